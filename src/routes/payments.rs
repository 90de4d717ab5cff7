use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};

use crate::{
    dto::payments::{
        CapturePaypalOrderRequest, CheckoutSessionResponse, CreateCheckoutSessionRequest,
        PaypalCaptureResponse, SessionStatusQuery, SessionStatusResponse,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    payments::paypal::PaypalOrder,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create-checkout-session", post(create_checkout_session))
        .route("/session-status", get(session_status))
        .route("/paypal/orders", post(create_paypal_order))
        .route("/paypal/orders/{order_id}/capture", post(capture_paypal_order))
}

#[utoipa::path(
    post,
    path = "/api/payments/create-checkout-session",
    request_body = CreateCheckoutSessionRequest,
    responses(
        (status = 200, description = "Embedded checkout session", body = ApiResponse<CheckoutSessionResponse>),
        (status = 400, description = "Empty cart or invalid address"),
        (status = 502, description = "Processor error")
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateCheckoutSessionRequest>,
) -> AppResult<Json<ApiResponse<CheckoutSessionResponse>>> {
    let resp = payment_service::create_checkout_session(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/payments/session-status",
    params(SessionStatusQuery),
    responses(
        (status = 200, description = "Session state, with the order once paid", body = ApiResponse<SessionStatusResponse>),
        (status = 502, description = "Processor error")
    ),
    tag = "Payments"
)]
pub async fn session_status(
    State(state): State<AppState>,
    Query(query): Query<SessionStatusQuery>,
) -> AppResult<Json<ApiResponse<SessionStatusResponse>>> {
    let resp = payment_service::session_status(&state, &query.session_id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/payments/paypal/orders",
    responses(
        (status = 201, description = "Wallet order created", body = ApiResponse<PaypalOrder>),
        (status = 400, description = "Empty cart"),
        (status = 502, description = "Processor error")
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_paypal_order(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<(StatusCode, Json<ApiResponse<PaypalOrder>>)> {
    let resp = payment_service::create_paypal_order(&state, &user).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    post,
    path = "/api/payments/paypal/orders/{order_id}/capture",
    params(("order_id" = String, Path, description = "PayPal order ID")),
    request_body = CapturePaypalOrderRequest,
    responses(
        (status = 200, description = "Capture status and local order", body = ApiResponse<PaypalCaptureResponse>),
        (status = 400, description = "Empty cart or invalid address"),
        (status = 502, description = "Processor error")
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn capture_paypal_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<String>,
    Json(payload): Json<CapturePaypalOrderRequest>,
) -> AppResult<Json<ApiResponse<PaypalCaptureResponse>>> {
    let resp = payment_service::capture_paypal_order(&state, &user, &order_id, payload).await?;
    Ok(Json(resp))
}
