use axum::{body::to_bytes, http::StatusCode, response::IntoResponse};
use serde_json::Value;
use storefront_api::{
    error::{AppError, FieldError},
    payments::PaymentError,
};

async fn render(err: AppError) -> (StatusCode, Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn validation_errors_list_each_field() {
    let (status, body) = render(AppError::Validation(vec![
        FieldError::new("email", "must be a valid email"),
        FieldError::new("password", "must be at least 6 characters"),
    ]))
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let errors = body["data"]["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0]["field"], "email");
    assert_eq!(errors[1]["message"], "must be at least 6 characters");
}

#[tokio::test]
async fn expired_token_carries_code() {
    let (status, body) = render(AppError::TokenExpired).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["data"]["code"], "TOKEN_EXPIRED");

    let (status, body) = render(AppError::Unauthorized("Invalid token".into())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["data"]["error"], "Invalid token");
    assert!(body["data"].get("code").is_none());
}

#[tokio::test]
async fn client_errors_keep_their_message() {
    let (status, body) = render(AppError::BadRequest("Cart is empty".into())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Cart is empty");

    let (status, body) = render(AppError::NotFoundMsg("Product not found".into())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["data"]["error"], "Product not found");

    let (status, _) = render(AppError::Forbidden).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn server_errors_hide_details() {
    let (status, body) =
        render(AppError::Internal(anyhow::anyhow!("pool exhausted at 10.0.0.3"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Internal Server Error");
    assert!(!body.to_string().contains("10.0.0.3"));

    let (status, _) = render(AppError::DbError(sqlx::Error::RowNotFound)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn processor_failures_are_bad_gateway() {
    let (status, _) = render(AppError::Payment(PaymentError::Api {
        status: 402,
        message: "card_declined".into(),
    }))
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, _) = render(AppError::Payment(PaymentError::NotConfigured("Stripe"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
