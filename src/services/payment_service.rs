use std::collections::HashMap;

use anyhow::{Context, anyhow};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, SqlErr, TransactionTrait};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    audit,
    dto::{
        orders::ShippingAddressInput,
        payments::{
            CapturePaypalOrderRequest, CheckoutSessionResponse, CreateCheckoutSessionRequest,
            PaypalCaptureResponse, SessionStatusResponse,
        },
    },
    entity::orders::{Column as OrderCol, Entity as Orders},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{OrderStatus, PaymentMethod},
    payments::{
        PaymentError,
        paypal::{PaypalOrder, PaypalOrderDetails},
        stripe::{LineItem, NewCheckoutSession, chunk_metadata, join_metadata},
    },
    pricing::{self, PriceLine},
    response::{ApiResponse, Meta},
    services::{
        cart_service,
        order_service::{self, NewOrder},
    },
    state::AppState,
};

const CURRENCY: &str = "usd";
const PAYPAL_CURRENCY: &str = "USD";

const META_USER_ID: &str = "user_id";
const META_CART: &str = "cart";
const META_SHIPPING: &str = "shipping";

/// Compact cart line stored in session metadata, which is size limited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SnapshotLine {
    p: Uuid,
    q: i32,
    u: i64,
}

pub(crate) fn session_metadata(
    user_id: Uuid,
    lines: &[PriceLine],
    address: &ShippingAddressInput,
) -> AppResult<Vec<(String, String)>> {
    let snapshot: Vec<SnapshotLine> = lines
        .iter()
        .map(|line| SnapshotLine {
            p: line.product_id,
            q: line.quantity,
            u: line.unit_price,
        })
        .collect();
    let cart = serde_json::to_string(&snapshot).context("encode cart snapshot")?;
    let shipping = serde_json::to_string(address).context("encode shipping address")?;

    let mut metadata = vec![(META_USER_ID.to_string(), user_id.to_string())];
    metadata.extend(chunk_metadata(META_CART, &cart));
    metadata.extend(chunk_metadata(META_SHIPPING, &shipping));
    Ok(metadata)
}

/// Rebuilds the buyer, priced lines and address a session was created with.
/// Line names are not carried; they are only needed for stock errors, which
/// a paid session never raises.
pub(crate) fn order_from_metadata(
    metadata: &HashMap<String, String>,
) -> anyhow::Result<(Uuid, Vec<PriceLine>, ShippingAddressInput)> {
    let user_id = metadata
        .get(META_USER_ID)
        .ok_or_else(|| anyhow!("session metadata has no user id"))?
        .parse::<Uuid>()
        .context("session metadata user id")?;

    let cart = join_metadata(metadata, META_CART)
        .ok_or_else(|| anyhow!("session metadata has no cart snapshot"))?;
    let snapshot: Vec<SnapshotLine> =
        serde_json::from_str(&cart).context("decode cart snapshot")?;
    if snapshot.is_empty() {
        return Err(anyhow!("session cart snapshot is empty"));
    }

    let shipping = join_metadata(metadata, META_SHIPPING)
        .ok_or_else(|| anyhow!("session metadata has no shipping address"))?;
    let address: ShippingAddressInput =
        serde_json::from_str(&shipping).context("decode shipping address")?;

    let lines = snapshot
        .into_iter()
        .map(|line| PriceLine {
            product_id: line.p,
            name: String::new(),
            unit_price: line.u,
            quantity: line.q,
        })
        .collect();

    Ok((user_id, lines, address))
}

fn checkout_line_items(lines: &[PriceLine]) -> Vec<LineItem> {
    let totals = pricing::totals(lines);
    let mut items: Vec<LineItem> = lines
        .iter()
        .map(|line| LineItem {
            name: line.name.clone(),
            unit_amount: line.unit_price,
            quantity: line.quantity,
        })
        .collect();
    if totals.shipping > 0 {
        items.push(LineItem {
            name: "Shipping".into(),
            unit_amount: totals.shipping,
            quantity: 1,
        });
    }
    items.push(LineItem {
        name: "Tax".into(),
        unit_amount: totals.tax,
        quantity: 1,
    });
    items
}

pub async fn create_checkout_session(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCheckoutSessionRequest,
) -> AppResult<ApiResponse<CheckoutSessionResponse>> {
    order_service::validate_address(&payload.shipping_address)?;
    let stripe = state.payments.stripe()?;

    let lines = cart_service::priced_lines(&state.pool, user.user_id).await?;

    let session = stripe
        .create_checkout_session(&NewCheckoutSession {
            line_items: checkout_line_items(&lines),
            return_url: format!(
                "{}/checkout/return?session_id={{CHECKOUT_SESSION_ID}}",
                state.config.client_url.trim_end_matches('/')
            ),
            currency: CURRENCY,
            metadata: session_metadata(user.user_id, &lines, &payload.shipping_address)?,
        })
        .await?;

    let client_secret = session
        .client_secret
        .ok_or_else(|| PaymentError::Parse("checkout session has no client_secret".into()))?;

    tracing::info!(session_id = %session.id, user_id = %user.user_id, "checkout session created");
    audit::record(
        &state.pool,
        Some(user.user_id),
        "checkout_session_create",
        "payments",
        serde_json::json!({ "session_id": session.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Checkout session created",
        CheckoutSessionResponse {
            client_secret,
            session_id: session.id,
        },
        Some(Meta::empty()),
    ))
}

pub async fn session_status(
    state: &AppState,
    session_id: &str,
) -> AppResult<ApiResponse<SessionStatusResponse>> {
    let session_id = session_id.trim();
    if session_id.is_empty() {
        return Err(AppError::BadRequest("session_id is required".into()));
    }
    let stripe = state.payments.stripe()?;
    let session = stripe.retrieve_checkout_session(session_id).await?;

    let status = session.status.clone().unwrap_or_else(|| "open".to_string());
    let customer_email = session.customer_email();

    let order_id = if session.is_paid() {
        let payment_ref = session
            .payment_intent
            .clone()
            .unwrap_or_else(|| session.id.clone());

        let order_id = match find_by_payment_ref(state, &payment_ref).await? {
            Some(id) => id,
            None => {
                let (user_id, lines, address) = order_from_metadata(&session.metadata)?;
                let total_amount = pricing::totals(&lines).total;
                materialize(
                    state,
                    NewOrder {
                        user_id,
                        address,
                        lines,
                        total_amount,
                        status: OrderStatus::Confirmed,
                        payment_method: PaymentMethod::Stripe,
                        payment_intent_id: Some(payment_ref),
                        clamp_stock: true,
                    },
                )
                .await?
            }
        };
        Some(order_id)
    } else {
        None
    };

    Ok(ApiResponse::success(
        "Session status",
        SessionStatusResponse {
            status,
            customer_email,
            order_id,
        },
        Some(Meta::empty()),
    ))
}

pub async fn create_paypal_order(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<PaypalOrder>> {
    let paypal = state.payments.paypal()?;
    let lines = cart_service::priced_lines(&state.pool, user.user_id).await?;
    let totals = pricing::totals(&lines);

    let order = paypal
        .create_order(
            PAYPAL_CURRENCY,
            pricing::format_amount(totals.total),
            &user.user_id.to_string(),
        )
        .await?;

    tracing::info!(paypal_order_id = %order.id, user_id = %user.user_id, total = totals.total, "wallet order created");

    Ok(ApiResponse::success(
        "PayPal order created",
        order,
        Some(Meta::empty()),
    ))
}

pub async fn capture_paypal_order(
    state: &AppState,
    user: &AuthUser,
    paypal_order_id: &str,
    payload: CapturePaypalOrderRequest,
) -> AppResult<ApiResponse<PaypalCaptureResponse>> {
    order_service::validate_address(&payload.shipping_address)?;
    let paypal = state.payments.paypal()?;

    if let Some(order_id) = find_by_payment_ref(state, paypal_order_id).await? {
        return Ok(capture_response("COMPLETED".to_string(), Some(order_id)));
    }

    // Checked before capturing so an empty cart is never charged.
    let lines = cart_service::priced_lines(&state.pool, user.user_id).await?;
    let total_amount = pricing::totals(&lines).total;

    // The order is built from the cart, so the cart must still match what
    // the buyer approved.
    let approved = paypal.get_order(paypal_order_id).await?;
    check_approved_order(&approved, user.user_id, total_amount)?;

    let captured = paypal.capture_order(paypal_order_id).await?;
    if !captured.is_completed() {
        tracing::warn!(paypal_order_id, status = %captured.status, "wallet capture not completed");
        return Ok(capture_response(captured.status, None));
    }

    let order_id = materialize(
        state,
        NewOrder {
            user_id: user.user_id,
            address: payload.shipping_address,
            lines,
            total_amount,
            status: OrderStatus::Confirmed,
            payment_method: PaymentMethod::Paypal,
            payment_intent_id: Some(captured.id.clone()),
            clamp_stock: true,
        },
    )
    .await?;

    Ok(capture_response(captured.status, Some(order_id)))
}

fn check_approved_order(
    approved: &PaypalOrderDetails,
    user_id: Uuid,
    total_amount: i64,
) -> AppResult<()> {
    let unit = approved
        .purchase_units
        .first()
        .ok_or_else(|| PaymentError::Parse("PayPal order has no purchase unit".into()))?;

    if unit.custom_id.as_deref() != Some(user_id.to_string().as_str()) {
        return Err(AppError::Forbidden);
    }

    let expected = pricing::format_amount(total_amount);
    if unit.amount.currency_code != PAYPAL_CURRENCY || unit.amount.value != expected {
        tracing::warn!(
            paypal_order_id = %approved.id,
            approved = %unit.amount.value,
            cart = %expected,
            "cart changed after wallet order was created"
        );
        return Err(AppError::BadRequest(
            "Cart changed since the PayPal order was created; please check out again".into(),
        ));
    }
    Ok(())
}

fn capture_response(status: String, order_id: Option<Uuid>) -> ApiResponse<PaypalCaptureResponse> {
    ApiResponse::success(
        "PayPal order captured",
        PaypalCaptureResponse { status, order_id },
        Some(Meta::empty()),
    )
}

async fn find_by_payment_ref(state: &AppState, payment_ref: &str) -> AppResult<Option<Uuid>> {
    let order = Orders::find()
        .filter(OrderCol::PaymentIntentId.eq(payment_ref))
        .one(&state.orm)
        .await?;
    Ok(order.map(|o| o.id))
}

/// Writes the local order for a captured payment. A concurrent poll that
/// loses the race on the unique payment reference returns the winner's order.
async fn materialize(state: &AppState, new: NewOrder) -> AppResult<Uuid> {
    let payment_ref = new
        .payment_intent_id
        .clone()
        .ok_or_else(|| AppError::Internal(anyhow!("captured payment without reference")))?;
    let method = new.payment_method;

    let txn = state.orm.begin().await?;
    let order = match order_service::place_order(&txn, new).await {
        Ok(order) => order,
        Err(AppError::OrmError(err))
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) =>
        {
            drop(txn);
            return find_by_payment_ref(state, &payment_ref)
                .await?
                .ok_or_else(|| AppError::Internal(anyhow!("payment order vanished after conflict")));
        }
        Err(err) => return Err(err),
    };
    txn.commit().await?;

    tracing::info!(
        order_id = %order.id,
        user_id = %order.user_id,
        payment_method = method.as_str(),
        total = order.total_amount,
        "payment session materialized"
    );
    audit::record(
        &state.pool,
        Some(order.user_id),
        "payment_materialize",
        "orders",
        serde_json::json!({
            "order_id": order.id,
            "payment_method": method.as_str(),
            "payment_ref": payment_ref,
        }),
    )
    .await;

    Ok(order.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> ShippingAddressInput {
        ShippingAddressInput {
            street_address: "1 Main St".into(),
            city: "Springfield".into(),
            state: "IL".into(),
            postal_code: "62701".into(),
            country: "US".into(),
        }
    }

    fn line(unit_price: i64, quantity: i32) -> PriceLine {
        PriceLine {
            product_id: Uuid::new_v4(),
            name: "Mug".into(),
            unit_price,
            quantity,
        }
    }

    #[test]
    fn metadata_restores_order_inputs() {
        let user_id = Uuid::new_v4();
        let lines: Vec<PriceLine> = (0..40).map(|i| line(100 + i, 1 + i as i32)).collect();
        let metadata: HashMap<String, String> = session_metadata(user_id, &lines, &address())
            .unwrap()
            .into_iter()
            .collect();

        assert!(metadata.len() <= 50);
        let (restored_user, restored_lines, restored_address) =
            order_from_metadata(&metadata).unwrap();
        assert_eq!(restored_user, user_id);
        assert_eq!(restored_address, address());
        assert_eq!(restored_lines.len(), lines.len());
        assert_eq!(pricing::subtotal(&restored_lines), pricing::subtotal(&lines));
        assert_eq!(restored_lines[3].product_id, lines[3].product_id);
    }

    #[test]
    fn missing_metadata_is_an_error() {
        let mut metadata = HashMap::new();
        metadata.insert(META_USER_ID.to_string(), Uuid::new_v4().to_string());
        assert!(order_from_metadata(&metadata).is_err());
    }

    fn approved(custom_id: Option<String>, value: &str) -> PaypalOrderDetails {
        serde_json::from_value(serde_json::json!({
            "id": "PAY-1",
            "status": "APPROVED",
            "purchase_units": [{
                "amount": { "currency_code": "USD", "value": value },
                "custom_id": custom_id,
            }],
        }))
        .unwrap()
    }

    #[test]
    fn approved_order_must_match_buyer_and_cart() {
        let user_id = Uuid::new_v4();
        let mine = Some(user_id.to_string());

        assert!(check_approved_order(&approved(mine.clone(), "27.00"), user_id, 2_700).is_ok());
        assert!(matches!(
            check_approved_order(&approved(mine, "27.00"), user_id, 3_100),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            check_approved_order(&approved(Some(Uuid::new_v4().to_string()), "27.00"), user_id, 2_700),
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            check_approved_order(&approved(None, "27.00"), user_id, 2_700),
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn line_items_add_shipping_below_threshold() {
        let items = checkout_line_items(&[line(1_000, 2)]);
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["Mug", "Shipping", "Tax"]);
        assert_eq!(items[1].unit_amount, pricing::FLAT_SHIPPING);
        assert_eq!(items[2].unit_amount, 160);

        let items = checkout_line_items(&[line(2_500, 2)]);
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["Mug", "Tax"]);
    }

    #[tokio::test]
    async fn repeated_materialization_keeps_one_order() -> anyhow::Result<()> {
        let Ok(database_url) =
            std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL"))
        else {
            eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run it.");
            return Ok(());
        };

        let pool = crate::db::create_pool(&database_url).await?;
        crate::db::run_migrations(&pool).await?;
        let state = AppState::new(
            pool,
            crate::config::AppConfig::new(database_url.as_str(), "materialize-secret"),
        )?;

        let tag = Uuid::new_v4().simple().to_string();
        let (user_id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO users (email, password_hash, first_name, last_name) \
             VALUES ($1, 'x', 'Pay', 'Er') RETURNING id",
        )
        .bind(format!("payer-{tag}@example.com"))
        .fetch_one(&state.pool)
        .await?;
        let (product_id,): (Uuid,) =
            sqlx::query_as("INSERT INTO products (name, price, stock) VALUES ($1, 1500, 1) RETURNING id")
                .bind(format!("Mug {tag}"))
                .fetch_one(&state.pool)
                .await?;

        let lines = vec![PriceLine {
            product_id,
            name: String::new(),
            unit_price: 1_500,
            quantity: 2,
        }];
        let new_order = || NewOrder {
            user_id,
            address: address(),
            lines: lines.clone(),
            total_amount: pricing::totals(&lines).total,
            status: OrderStatus::Confirmed,
            payment_method: PaymentMethod::Stripe,
            payment_intent_id: Some(format!("pi_{tag}")),
            clamp_stock: true,
        };

        let first = materialize(&state, new_order()).await?;
        let second = materialize(&state, new_order()).await?;
        assert_eq!(first, second);

        let (orders,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&state.pool)
            .await?;
        assert_eq!(orders, 1);

        // Paid for two with one left: stock floors at zero.
        let (stock,): (i32,) = sqlx::query_as("SELECT stock FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_one(&state.pool)
            .await?;
        assert_eq!(stock, 0);

        assert_eq!(find_by_payment_ref(&state, &format!("pi_{tag}")).await?, Some(first));
        Ok(())
    }

    #[tokio::test]
    async fn paid_line_for_missing_product_is_dropped_but_charged_total_kept() -> anyhow::Result<()> {
        let Ok(database_url) =
            std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL"))
        else {
            eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run it.");
            return Ok(());
        };

        let pool = crate::db::create_pool(&database_url).await?;
        crate::db::run_migrations(&pool).await?;
        let state = AppState::new(
            pool,
            crate::config::AppConfig::new(database_url.as_str(), "materialize-secret"),
        )?;

        let tag = Uuid::new_v4().simple().to_string();
        let (user_id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO users (email, password_hash, first_name, last_name) \
             VALUES ($1, 'x', 'Pay', 'Er') RETURNING id",
        )
        .bind(format!("gone-{tag}@example.com"))
        .fetch_one(&state.pool)
        .await?;
        let (product_id,): (Uuid,) =
            sqlx::query_as("INSERT INTO products (name, price, stock) VALUES ($1, 1500, 5) RETURNING id")
                .bind(format!("Lamp {tag}"))
                .fetch_one(&state.pool)
                .await?;

        let lines = vec![
            PriceLine {
                product_id,
                name: String::new(),
                unit_price: 1_500,
                quantity: 1,
            },
            PriceLine {
                product_id: Uuid::new_v4(),
                name: String::new(),
                unit_price: 4_000,
                quantity: 1,
            },
        ];
        let charged = pricing::totals(&lines).total;

        let order_id = materialize(
            &state,
            NewOrder {
                user_id,
                address: address(),
                lines,
                total_amount: charged,
                status: OrderStatus::Confirmed,
                payment_method: PaymentMethod::Stripe,
                payment_intent_id: Some(format!("pi_gone_{tag}")),
                clamp_stock: true,
            },
        )
        .await?;

        let items: Vec<(Uuid,)> =
            sqlx::query_as("SELECT product_id FROM order_items WHERE order_id = $1")
                .bind(order_id)
                .fetch_all(&state.pool)
                .await?;
        assert_eq!(items, vec![(product_id,)]);

        let (total,): (i64,) = sqlx::query_as("SELECT total_amount FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_one(&state.pool)
            .await?;
        assert_eq!(total, charged);
        Ok(())
    }
}
