use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{HTTP_TIMEOUT, PaymentError, api_error};

/// Renew the OAuth token this long before the processor says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Client for the wallet checkout (PayPal Orders v2 API).
#[derive(Clone)]
pub struct PaypalClient {
    inner: Arc<PaypalClientInner>,
}

struct PaypalClientInner {
    client: reqwest::Client,
    api_base: String,
    client_id: String,
    client_secret: SecretString,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    intent: &'static str,
    purchase_units: [PurchaseUnit<'a>; 1],
}

#[derive(Debug, Serialize)]
struct PurchaseUnit<'a> {
    amount: Amount<'a>,
    custom_id: &'a str,
}

#[derive(Debug, Serialize)]
struct Amount<'a> {
    currency_code: &'a str,
    value: String,
}

/// An order as PayPal holds it before capture: what the buyer approved.
#[derive(Debug, Clone, Deserialize)]
pub struct PaypalOrderDetails {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub purchase_units: Vec<PurchaseUnitDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseUnitDetails {
    pub amount: AmountDetails,
    pub custom_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AmountDetails {
    pub currency_code: String,
    pub value: String,
}

/// The subset of a PayPal order the storefront relies on.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PaypalOrder {
    pub id: String,
    pub status: String,
}

impl PaypalOrder {
    pub fn is_completed(&self) -> bool {
        self.status == "COMPLETED"
    }
}

impl PaypalClient {
    pub fn new(
        api_base: &str,
        client_id: String,
        client_secret: SecretString,
    ) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            inner: Arc::new(PaypalClientInner {
                client,
                api_base: api_base.trim_end_matches('/').to_string(),
                client_id,
                client_secret,
                token: Mutex::new(None),
            }),
        })
    }

    /// Create a capture-intent order for `value` (a decimal string such as
    /// `"12.34"`). `custom_id` travels with the order and comes back from
    /// [`get_order`](Self::get_order).
    pub async fn create_order(
        &self,
        currency_code: &str,
        value: String,
        custom_id: &str,
    ) -> Result<PaypalOrder, PaymentError> {
        let token = self.access_token().await?;
        let url = format!("{}/v2/checkout/orders", self.inner.api_base);
        let body = CreateOrderBody {
            intent: "CAPTURE",
            purchase_units: [PurchaseUnit {
                amount: Amount {
                    currency_code,
                    value,
                },
                custom_id,
            }],
        };

        let response = self
            .inner
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        response
            .json::<PaypalOrder>()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))
    }

    pub async fn get_order(&self, order_id: &str) -> Result<PaypalOrderDetails, PaymentError> {
        let token = self.access_token().await?;
        let url = format!("{}/v2/checkout/orders/{}", self.inner.api_base, order_id);

        let response = self
            .inner
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        response
            .json::<PaypalOrderDetails>()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))
    }

    pub async fn capture_order(&self, order_id: &str) -> Result<PaypalOrder, PaymentError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/v2/checkout/orders/{}/capture",
            self.inner.api_base, order_id
        );

        let response = self
            .inner
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Prefer", "return=minimal")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        response
            .json::<PaypalOrder>()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))
    }

    /// Returns a cached client-credentials token, fetching a new one when needed.
    async fn access_token(&self) -> Result<String, PaymentError> {
        let mut cached = self.inner.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.access_token.clone());
        }

        let url = format!("{}/v1/oauth2/token", self.inner.api_base);
        let response = self
            .inner
            .client
            .post(&url)
            .basic_auth(
                &self.inner.client_id,
                Some(self.inner.client_secret.expose_secret()),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        tracing::debug!(expires_in = token.expires_in, "paypal access token refreshed");

        Ok(token.access_token)
    }
}
