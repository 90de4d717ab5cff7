//! Clients for the two hosted payment processors.
//!
//! Both are thin reqwest wrappers: the card processor exposes embedded
//! checkout sessions that the storefront polls for completion, the wallet
//! processor exposes create/capture order calls behind an OAuth
//! client-credentials token.

pub mod paypal;
pub mod stripe;

use std::time::Duration;

use thiserror::Error;

pub use paypal::PaypalClient;
pub use stripe::StripeClient;

use crate::config::AppConfig;

pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Processor clients shared through application state. A processor whose
/// credentials are absent is `None` and its routes answer with an error.
#[derive(Clone, Default)]
pub struct PaymentClients {
    pub stripe: Option<StripeClient>,
    pub paypal: Option<PaypalClient>,
}

impl PaymentClients {
    pub fn from_config(config: &AppConfig) -> Result<Self, PaymentError> {
        let stripe = match &config.stripe.secret_key {
            Some(key) => Some(StripeClient::new(&config.stripe.api_base, key.clone())?),
            None => {
                tracing::warn!("STRIPE_SECRET_KEY not set, card checkout disabled");
                None
            }
        };

        let paypal = match (&config.paypal.client_id, &config.paypal.client_secret) {
            (Some(id), Some(secret)) => Some(PaypalClient::new(
                &config.paypal.api_base,
                id.clone(),
                secret.clone(),
            )?),
            _ => {
                tracing::warn!("PayPal credentials not set, wallet checkout disabled");
                None
            }
        };

        Ok(Self { stripe, paypal })
    }

    pub fn stripe(&self) -> Result<&StripeClient, PaymentError> {
        self.stripe
            .as_ref()
            .ok_or(PaymentError::NotConfigured("Stripe"))
    }

    pub fn paypal(&self) -> Result<&PaypalClient, PaymentError> {
        self.paypal
            .as_ref()
            .ok_or(PaymentError::NotConfigured("PayPal"))
    }
}

/// Reads the body of a failed response into a [`PaymentError::Api`].
pub(crate) async fn api_error(response: reqwest::Response) -> PaymentError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    PaymentError::Api { status, message }
}
