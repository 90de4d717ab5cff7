use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use storefront_api::{
    client::{ApiClient, ClientError, RefreshError},
    dto::auth::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse},
    error::AppError,
    middleware::auth::bearer_token,
    models::User,
    response::{ApiResponse, Meta},
};
use uuid::Uuid;

/// In-process stand-in for the auth endpoints.
struct Stub {
    user: User,
    valid_token: Mutex<String>,
    refresh_calls: AtomicUsize,
    reject_refresh: AtomicBool,
}

impl Stub {
    fn expire_access_token(&self) {
        *self.valid_token.lock().unwrap() = "unreachable".to_string();
    }
}

async fn login(State(stub): State<Arc<Stub>>, Json(body): Json<LoginRequest>) -> Response {
    if body.password != "secret" {
        return AppError::Unauthorized("Invalid email or password".into()).into_response();
    }
    *stub.valid_token.lock().unwrap() = "access-1".to_string();
    Json(ApiResponse::success(
        "Login success",
        LoginResponse {
            access_token: "access-1".into(),
            refresh_token: "refresh-1".into(),
            user: stub.user.clone(),
        },
        Some(Meta::empty()),
    ))
    .into_response()
}

async fn refresh(State(stub): State<Arc<Stub>>, Json(body): Json<RefreshRequest>) -> Response {
    let n = stub.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    // Hold the refresh open so concurrent failures pile up behind it.
    tokio::time::sleep(Duration::from_millis(150)).await;

    if stub.reject_refresh.load(Ordering::SeqCst)
        || body.refresh_token.as_deref() != Some("refresh-1")
    {
        return AppError::Unauthorized("Invalid refresh token".into()).into_response();
    }
    let token = format!("access-{}", n + 1);
    *stub.valid_token.lock().unwrap() = token.clone();
    Json(ApiResponse::success(
        "Token refreshed",
        RefreshResponse { access_token: token },
        Some(Meta::empty()),
    ))
    .into_response()
}

async fn profile(State(stub): State<Arc<Stub>>, headers: HeaderMap) -> Response {
    let valid = stub.valid_token.lock().unwrap().clone();
    match bearer_token(&headers) {
        Some(token) if token == valid => Json(ApiResponse::success(
            "Profile",
            stub.user.clone(),
            Some(Meta::empty()),
        ))
        .into_response(),
        Some(_) => AppError::TokenExpired.into_response(),
        None => AppError::Unauthorized("Access token required".into()).into_response(),
    }
}

async fn logout() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::message_only("Logged out"))
}

async fn spawn_stub() -> (String, Arc<Stub>) {
    let now = Utc::now();
    let stub = Arc::new(Stub {
        user: User {
            id: Uuid::new_v4(),
            email: "shopper@example.com".into(),
            first_name: "Demo".into(),
            last_name: "Shopper".into(),
            phone: None,
            role: "user".into(),
            is_active: true,
            email_verified: true,
            last_login: None,
            created_at: now,
            updated_at: now,
        },
        valid_token: Mutex::new(String::new()),
        refresh_calls: AtomicUsize::new(0),
        reject_refresh: AtomicBool::new(false),
    });

    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/profile", get(profile))
        .route("/api/auth/logout", post(logout))
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), stub)
}

async fn concurrent_profiles(client: &Arc<ApiClient>, n: usize) -> Vec<Result<User, ClientError>> {
    let handles: Vec<_> = (0..n)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.profile().await })
        })
        .collect();

    let mut results = Vec::with_capacity(n);
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn login_then_authenticated_call() {
    let (base_url, stub) = spawn_stub().await;
    let client = ApiClient::new(base_url).unwrap();

    assert!(matches!(client.profile().await, Err(ClientError::NotAuthenticated)));

    let login = client.login("shopper@example.com", "secret").await.unwrap();
    assert_eq!(login.user.email, "shopper@example.com");
    assert_eq!(client.tokens().access_token().as_deref(), Some("access-1"));

    let user = client.profile().await.unwrap();
    assert_eq!(user.id, stub.user.id);
    assert_eq!(stub.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_password_surfaces_api_error() {
    let (base_url, _stub) = spawn_stub().await;
    let client = ApiClient::new(base_url).unwrap();

    let err = client.login("shopper@example.com", "nope").await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(!err.is_token_expired());
    assert_eq!(client.tokens().access_token(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_burst_refreshes_once_and_replays() {
    let (base_url, stub) = spawn_stub().await;
    let client = Arc::new(ApiClient::new(base_url).unwrap());
    client.login("shopper@example.com", "secret").await.unwrap();

    stub.expire_access_token();
    let results = concurrent_profiles(&client, 6).await;

    assert!(results.iter().all(|r| r.as_ref().is_ok_and(|u| u.id == stub.user.id)));
    assert_eq!(stub.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.tokens().access_token().as_deref(), Some("access-2"));

    // The refreshed token is used directly from now on.
    client.profile().await.unwrap();
    assert_eq!(stub.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_refresh_fails_all_and_signs_out() {
    let (base_url, stub) = spawn_stub().await;
    let client = Arc::new(ApiClient::new(base_url).unwrap());
    client.login("shopper@example.com", "secret").await.unwrap();

    stub.reject_refresh.store(true, Ordering::SeqCst);
    stub.expire_access_token();
    let results = concurrent_profiles(&client, 4).await;

    assert!(
        results
            .iter()
            .all(|r| matches!(r, Err(ClientError::Refresh(_))))
    );
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(ClientError::Refresh(RefreshError::Rejected(_)))))
    );
    assert_eq!(stub.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.tokens().access_token(), None);
    assert_eq!(client.tokens().refresh_token(), None);

    assert!(matches!(client.profile().await, Err(ClientError::NotAuthenticated)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn logout_drops_local_credentials() {
    let (base_url, _stub) = spawn_stub().await;
    let client = ApiClient::new(base_url).unwrap();
    client.login("shopper@example.com", "secret").await.unwrap();

    client.logout().await.unwrap();
    assert_eq!(client.tokens().access_token(), None);
    assert_eq!(client.tokens().refresh_token(), None);
}
