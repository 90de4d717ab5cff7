//! Typed HTTP client for the storefront API.
//!
//! Authenticated calls that come back with `401 TOKEN_EXPIRED` are replayed
//! once with a fresh access token obtained through a [`RefreshCoalescer`], so
//! a burst of expired requests costs a single refresh call.

pub mod coalescer;
pub mod tokens;

use std::{sync::Arc, time::Duration};

use reqwest::{Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use uuid::Uuid;

pub use coalescer::{BoxFuture, RefreshCoalescer, RefreshError, TokenRefresher};
pub use tokens::TokenStore;

use crate::{
    dto::{
        auth::{LoginRequest, LoginResponse, LogoutRequest, RefreshRequest, RefreshResponse},
        cart::{AddToCartRequest, CartView},
        orders::{CreateOrderRequest, OrderDetail, OrderList, ShippingAddressInput},
        products::ProductList,
    },
    error::{ErrorData, TOKEN_EXPIRED_CODE},
    models::{CartItem, User},
    response::ApiResponse,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api {
        status: u16,
        message: String,
        code: Option<String>,
    },

    #[error("token refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("decode error: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_token_expired(&self) -> bool {
        matches!(
            self,
            ClientError::Api { status: 401, code: Some(code), .. } if code == TOKEN_EXPIRED_CODE
        )
    }
}

struct RawResponse {
    status: StatusCode,
    body: Vec<u8>,
}

fn decode<T: DeserializeOwned>(raw: RawResponse) -> Result<ApiResponse<T>, ClientError> {
    if raw.status.is_success() {
        return serde_json::from_slice(&raw.body).map_err(|e| ClientError::Decode(e.to_string()));
    }

    let envelope: Option<ApiResponse<ErrorData>> = serde_json::from_slice(&raw.body).ok();
    let (message, code) = match envelope {
        Some(envelope) => match envelope.data {
            Some(data) => (data.error, data.code),
            None => (envelope.message, None),
        },
        None => (String::from_utf8_lossy(&raw.body).into_owned(), None),
    };
    Err(ClientError::Api {
        status: raw.status.as_u16(),
        message,
        code,
    })
}

fn join_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Refreshes through `POST /api/auth/refresh`.
pub struct HttpRefresher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRefresher {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

impl TokenRefresher for HttpRefresher {
    fn refresh(&self, refresh_token: String) -> BoxFuture<'_, Result<String, RefreshError>> {
        Box::pin(async move {
            let response = self
                .http
                .post(join_url(&self.base_url, "/api/auth/refresh"))
                .json(&RefreshRequest {
                    refresh_token: Some(refresh_token),
                })
                .send()
                .await
                .map_err(|e| RefreshError::Transport(e.to_string()))?;

            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| RefreshError::Transport(e.to_string()))?
                .to_vec();

            match decode::<RefreshResponse>(RawResponse { status, body }) {
                Ok(ApiResponse {
                    data: Some(data), ..
                }) => Ok(data.access_token),
                Ok(_) => Err(RefreshError::Rejected("refresh response had no token".into())),
                Err(err) => Err(RefreshError::Rejected(err.to_string())),
            }
        })
    }
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenStore,
    coalescer: RefreshCoalescer,
}

impl ApiClient {
    /// Client that refreshes against the same server it calls.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let base_url = base_url.into();
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let refresher = Arc::new(HttpRefresher::new(http.clone(), base_url.clone()));
        Ok(Self::with_refresher(http, base_url, refresher))
    }

    pub fn with_refresher(
        http: reqwest::Client,
        base_url: impl Into<String>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        let tokens = TokenStore::new();
        let coalescer = RefreshCoalescer::new(refresher, tokens.clone());
        Self {
            http,
            base_url: base_url.into(),
            tokens,
            coalescer,
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let raw = self.execute(Method::POST, "/api/auth/login", Some(&body), None).await?;
        let login = data_of(decode::<LoginResponse>(raw)?)?;
        self.tokens
            .set(login.access_token.clone(), login.refresh_token.clone());
        Ok(login)
    }

    /// Revokes the refresh token server-side. Local credentials are dropped
    /// even when the call fails.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let body = LogoutRequest {
            refresh_token: self.tokens.refresh_token(),
        };
        let result = self
            .execute(Method::POST, "/api/auth/logout", Some(&body), None)
            .await
            .and_then(decode::<serde_json::Value>);
        self.tokens.clear();
        result.map(|_| ())
    }

    pub async fn profile(&self) -> Result<User, ClientError> {
        data_of(self.authed::<User, ()>(Method::GET, "/api/auth/profile", None).await?)
    }

    pub async fn list_products(
        &self,
        page: i64,
        per_page: i64,
    ) -> Result<ApiResponse<ProductList>, ClientError> {
        let path = format!("/api/products?page={page}&per_page={per_page}");
        let raw = self.execute::<()>(Method::GET, &path, None, None).await?;
        decode(raw)
    }

    pub async fn get_cart(&self) -> Result<CartView, ClientError> {
        data_of(self.authed::<CartView, ()>(Method::GET, "/api/cart", None).await?)
    }

    pub async fn add_to_cart(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartItem, ClientError> {
        let body = AddToCartRequest {
            product_id,
            quantity,
        };
        data_of(self.authed(Method::POST, "/api/cart", Some(&body)).await?)
    }

    pub async fn create_order(
        &self,
        shipping_address: ShippingAddressInput,
    ) -> Result<OrderDetail, ClientError> {
        let body = CreateOrderRequest { shipping_address };
        data_of(self.authed(Method::POST, "/api/orders", Some(&body)).await?)
    }

    pub async fn list_orders(&self, page: i64) -> Result<ApiResponse<OrderList>, ClientError> {
        let path = format!("/api/orders?page={page}");
        self.authed::<OrderList, ()>(Method::GET, &path, None).await
    }

    /// Sends an authenticated request, replaying it once after a coalesced
    /// refresh when the access token has expired.
    pub async fn authed<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<ApiResponse<T>, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let token = self
            .tokens
            .access_token()
            .ok_or(ClientError::NotAuthenticated)?;

        let raw = self.execute(method.clone(), path, body, Some(&token)).await?;
        match decode(raw) {
            Err(err) if err.is_token_expired() => {
                let fresh = self.coalescer.refresh_after(&token).await?;
                tracing::debug!(path, "replaying request with refreshed token");
                let raw = self.execute(method, path, body, Some(&fresh)).await?;
                decode(raw)
            }
            other => other,
        }
    }

    async fn execute<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        token: Option<&str>,
    ) -> Result<RawResponse, ClientError>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.http.request(method, join_url(&self.base_url, path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        Ok(RawResponse { status, body })
    }
}

fn data_of<T>(response: ApiResponse<T>) -> Result<T, ClientError> {
    response
        .data
        .ok_or_else(|| ClientError::Decode(format!("response '{}' had no data", response.message)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(status: u16, body: serde_json::Value) -> RawResponse {
        RawResponse {
            status: StatusCode::from_u16(status).unwrap(),
            body: serde_json::to_vec(&body).unwrap(),
        }
    }

    #[test]
    fn expired_token_envelope_is_recognised() {
        let err = decode::<serde_json::Value>(raw(
            401,
            serde_json::json!({
                "message": "Token expired",
                "data": { "error": "Token expired", "code": "TOKEN_EXPIRED" },
                "meta": null
            }),
        ))
        .unwrap_err();
        assert!(err.is_token_expired());
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn plain_unauthorized_is_not_an_expiry() {
        let err = decode::<serde_json::Value>(raw(
            401,
            serde_json::json!({
                "message": "Invalid token",
                "data": { "error": "Invalid token" },
                "meta": null
            }),
        ))
        .unwrap_err();
        assert!(!err.is_token_expired());
        assert!(matches!(err, ClientError::Api { ref message, .. } if message == "Invalid token"));
    }

    #[test]
    fn success_body_must_match_the_type() {
        let err = decode::<CartView>(raw(200, serde_json::json!({ "message": "x", "data": 1 })))
            .unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[test]
    fn urls_join_without_double_slash() {
        assert_eq!(join_url("http://h:1/", "/api/cart"), "http://h:1/api/cart");
    }
}
