use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use axum::{
    Form, Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use secrecy::SecretString;
use serde_json::{Value, json};
use storefront_api::{
    config::AppConfig,
    db::{create_pool, run_migrations},
    dto::{
        cart::AddToCartRequest,
        orders::ShippingAddressInput,
        payments::{CapturePaypalOrderRequest, CreateCheckoutSessionRequest},
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::ROLE_USER,
    services::{cart_service, payment_service},
    state::AppState,
};
use uuid::Uuid;

/// In-process stand-in for both payment processors.
#[derive(Default)]
struct Processor {
    /// Checkout session id -> metadata it was created with.
    sessions: Mutex<HashMap<String, HashMap<String, String>>>,
    /// Wallet order id -> the purchase unit it was created with.
    wallet_orders: Mutex<HashMap<String, Value>>,
    captures: AtomicUsize,
    decline_capture: AtomicBool,
}

async fn create_session(
    State(processor): State<Arc<Processor>>,
    Form(form): Form<Vec<(String, String)>>,
) -> Json<Value> {
    let metadata: HashMap<String, String> = form
        .into_iter()
        .filter_map(|(key, value)| {
            key.strip_prefix("metadata[")
                .and_then(|rest| rest.strip_suffix(']'))
                .map(|name| (name.to_string(), value))
        })
        .collect();
    let id = format!("cs_test_{}", Uuid::new_v4().simple());
    processor
        .sessions
        .lock()
        .unwrap()
        .insert(id.clone(), metadata);
    Json(json!({
        "id": id,
        "status": "open",
        "payment_status": "unpaid",
        "client_secret": format!("{id}_secret"),
    }))
}

/// Every session reads back as paid.
async fn retrieve_session(
    State(processor): State<Arc<Processor>>,
    Path(id): Path<String>,
) -> Json<Value> {
    let metadata = processor
        .sessions
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .unwrap_or_default();
    Json(json!({
        "id": id,
        "status": "complete",
        "payment_status": "paid",
        "payment_intent": format!("pi_{id}"),
        "customer_details": { "email": "payer@example.com" },
        "metadata": metadata,
    }))
}

async fn oauth_token() -> Json<Value> {
    Json(json!({ "access_token": "wallet-token", "expires_in": 3600 }))
}

async fn create_wallet_order(
    State(processor): State<Arc<Processor>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let id = format!("WALLET-{}", Uuid::new_v4().simple());
    processor
        .wallet_orders
        .lock()
        .unwrap()
        .insert(id.clone(), body["purchase_units"][0].clone());
    Json(json!({ "id": id, "status": "CREATED" }))
}

async fn get_wallet_order(
    State(processor): State<Arc<Processor>>,
    Path(id): Path<String>,
) -> Json<Value> {
    let unit = processor
        .wallet_orders
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .unwrap_or(Value::Null);
    Json(json!({ "id": id, "status": "APPROVED", "purchase_units": [unit] }))
}

async fn capture_wallet_order(
    State(processor): State<Arc<Processor>>,
    Path(id): Path<String>,
) -> Json<Value> {
    processor.captures.fetch_add(1, Ordering::SeqCst);
    let status = if processor.decline_capture.load(Ordering::SeqCst) {
        "PAYER_ACTION_REQUIRED"
    } else {
        "COMPLETED"
    };
    Json(json!({ "id": id, "status": status }))
}

async fn spawn_processor() -> (String, Arc<Processor>) {
    let processor = Arc::new(Processor::default());
    let app = Router::new()
        .route("/v1/checkout/sessions", post(create_session))
        .route("/v1/checkout/sessions/{id}", get(retrieve_session))
        .route("/v1/oauth2/token", post(oauth_token))
        .route("/v2/checkout/orders", post(create_wallet_order))
        .route("/v2/checkout/orders/{id}", get(get_wallet_order))
        .route("/v2/checkout/orders/{id}/capture", post(capture_wallet_order))
        .with_state(processor.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), processor)
}

fn address() -> ShippingAddressInput {
    ShippingAddressInput {
        street_address: "1 Main St".into(),
        city: "Springfield".into(),
        state: "IL".into(),
        postal_code: "62701".into(),
        country: "US".into(),
    }
}

async fn setup() -> anyhow::Result<Option<(AppState, Arc<Processor>, AuthUser, Uuid)>> {
    let Ok(database_url) =
        std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL"))
    else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run payment flow tests.");
        return Ok(None);
    };

    let (base_url, processor) = spawn_processor().await;
    let mut config = AppConfig::new(database_url.as_str(), "payments-flow-secret");
    config.stripe.secret_key = Some(SecretString::from("sk_test_local"));
    config.stripe.api_base = base_url.clone();
    config.paypal.client_id = Some("wallet-client".into());
    config.paypal.client_secret = Some(SecretString::from("wallet-secret"));
    config.paypal.api_base = base_url;

    let pool = create_pool(&database_url).await?;
    run_migrations(&pool).await?;
    let state = AppState::new(pool, config)?;

    let tag = Uuid::new_v4().simple().to_string();
    let (user_id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO users (email, password_hash, first_name, last_name, email_verified) \
         VALUES ($1, 'x', 'Pay', 'Er', TRUE) RETURNING id",
    )
    .bind(format!("payer-{tag}@example.com"))
    .fetch_one(&state.pool)
    .await?;
    let (product_id,): (Uuid,) =
        sqlx::query_as("INSERT INTO products (name, price, stock) VALUES ($1, 1500, 10) RETURNING id")
            .bind(format!("Kettle {tag}"))
            .fetch_one(&state.pool)
            .await?;

    let user = AuthUser {
        user_id,
        role: ROLE_USER.to_string(),
    };
    Ok(Some((state, processor, user, product_id)))
}

async fn add(state: &AppState, user: &AuthUser, product_id: Uuid, quantity: i32) -> anyhow::Result<()> {
    cart_service::add_to_cart(
        &state.pool,
        user,
        AddToCartRequest {
            product_id,
            quantity,
        },
    )
    .await?;
    Ok(())
}

async fn orders_with_ref(state: &AppState, payment_ref: &str) -> anyhow::Result<Vec<(Uuid, String, String)>> {
    Ok(sqlx::query_as(
        "SELECT id, status, payment_method FROM orders WHERE payment_intent_id = $1",
    )
    .bind(payment_ref)
    .fetch_all(&state.pool)
    .await?)
}

#[tokio::test]
async fn paid_session_polls_create_one_confirmed_order() -> anyhow::Result<()> {
    let Some((state, _processor, user, product_id)) = setup().await? else {
        return Ok(());
    };
    add(&state, &user, product_id, 2).await?;

    let session = payment_service::create_checkout_session(
        &state,
        &user,
        CreateCheckoutSessionRequest {
            shipping_address: address(),
        },
    )
    .await?
    .data
    .unwrap();
    assert!(session.client_secret.ends_with("_secret"));

    let first = payment_service::session_status(&state, &session.session_id)
        .await?
        .data
        .unwrap();
    let second = payment_service::session_status(&state, &session.session_id)
        .await?
        .data
        .unwrap();

    assert_eq!(first.status, "complete");
    assert_eq!(first.customer_email.as_deref(), Some("payer@example.com"));
    let order_id = first.order_id.expect("paid session has an order");
    assert_eq!(second.order_id, Some(order_id));

    let orders = orders_with_ref(&state, &format!("pi_{}", session.session_id)).await?;
    assert_eq!(orders, vec![(order_id, "confirmed".to_string(), "stripe".to_string())]);

    let cart = cart_service::get_cart(&state.pool, &user).await?.data.unwrap();
    assert!(cart.items.is_empty());

    let (stock,): (i32,) = sqlx::query_as("SELECT stock FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_one(&state.pool)
        .await?;
    assert_eq!(stock, 8);
    Ok(())
}

#[tokio::test]
async fn wallet_capture_orders_only_what_was_approved_and_completed() -> anyhow::Result<()> {
    let Some((state, processor, user, product_id)) = setup().await? else {
        return Ok(());
    };
    let capture = |id: String| {
        let state = state.clone();
        let user = user.clone();
        async move {
            payment_service::capture_paypal_order(
                &state,
                &user,
                &id,
                CapturePaypalOrderRequest {
                    shipping_address: address(),
                },
            )
            .await
        }
    };

    add(&state, &user, product_id, 1).await?;
    let declined = payment_service::create_paypal_order(&state, &user)
        .await?
        .data
        .unwrap();

    // Not completed: nothing is ordered and the cart stays.
    processor.decline_capture.store(true, Ordering::SeqCst);
    let outcome = capture(declined.id.clone()).await?.data.unwrap();
    assert_eq!(outcome.status, "PAYER_ACTION_REQUIRED");
    assert_eq!(outcome.order_id, None);
    assert!(orders_with_ref(&state, &declined.id).await?.is_empty());
    processor.decline_capture.store(false, Ordering::SeqCst);

    // The cart grew after approval: refused before any capture.
    add(&state, &user, product_id, 1).await?;
    let captures = processor.captures.load(Ordering::SeqCst);
    let changed = capture(declined.id.clone()).await;
    assert!(matches!(changed, Err(AppError::BadRequest(_))));
    assert_eq!(processor.captures.load(Ordering::SeqCst), captures);

    let approved = payment_service::create_paypal_order(&state, &user)
        .await?
        .data
        .unwrap();
    let outcome = capture(approved.id.clone()).await?.data.unwrap();
    assert_eq!(outcome.status, "COMPLETED");
    let order_id = outcome.order_id.expect("completed capture has an order");

    let orders = orders_with_ref(&state, &approved.id).await?;
    assert_eq!(orders, vec![(order_id, "confirmed".to_string(), "paypal".to_string())]);

    // Capturing again returns the same order without charging twice.
    let captures = processor.captures.load(Ordering::SeqCst);
    let again = capture(approved.id.clone()).await?.data.unwrap();
    assert_eq!(again.order_id, Some(order_id));
    assert_eq!(processor.captures.load(Ordering::SeqCst), captures);

    let cart = cart_service::get_cart(&state.pool, &user).await?.data.unwrap();
    assert!(cart.items.is_empty());
    Ok(())
}
