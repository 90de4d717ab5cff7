use std::{collections::HashMap, sync::Arc};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{HTTP_TIMEOUT, PaymentError, api_error};

/// Stripe caps each metadata value at 500 characters.
const METADATA_VALUE_LIMIT: usize = 500;

/// Client for the hosted card checkout (Stripe Checkout Sessions API).
#[derive(Clone)]
pub struct StripeClient {
    inner: Arc<StripeClientInner>,
}

struct StripeClientInner {
    client: reqwest::Client,
    api_base: String,
    secret_key: SecretString,
}

#[derive(Debug, Clone)]
pub struct LineItem {
    pub name: String,
    pub unit_amount: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct NewCheckoutSession {
    pub line_items: Vec<LineItem>,
    pub return_url: String,
    pub currency: &'static str,
    pub metadata: Vec<(String, String)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub client_secret: Option<String>,
    pub payment_intent: Option<String>,
    pub customer_email: Option<String>,
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.status.as_deref() == Some("complete") && self.payment_status.as_deref() == Some("paid")
    }

    pub fn customer_email(&self) -> Option<String> {
        self.customer_details
            .as_ref()
            .and_then(|details| details.email.clone())
            .or_else(|| self.customer_email.clone())
    }
}

impl StripeClient {
    pub fn new(api_base: &str, secret_key: SecretString) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            inner: Arc::new(StripeClientInner {
                client,
                api_base: api_base.trim_end_matches('/').to_string(),
                secret_key,
            }),
        })
    }

    /// Create an embedded-UI checkout session in payment mode.
    pub async fn create_checkout_session(
        &self,
        session: &NewCheckoutSession,
    ) -> Result<CheckoutSession, PaymentError> {
        let url = format!("{}/v1/checkout/sessions", self.inner.api_base);
        let form = checkout_form(session);

        let response = self
            .inner
            .client
            .post(&url)
            .bearer_auth(self.inner.secret_key.expose_secret())
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        response
            .json::<CheckoutSession>()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))
    }

    pub async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, PaymentError> {
        let url = format!("{}/v1/checkout/sessions/{}", self.inner.api_base, session_id);

        let response = self
            .inner
            .client
            .get(&url)
            .bearer_auth(self.inner.secret_key.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        response
            .json::<CheckoutSession>()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))
    }
}

/// Flattens a session request into Stripe's bracketed form encoding.
pub fn checkout_form(session: &NewCheckoutSession) -> Vec<(String, String)> {
    let mut form = vec![
        ("ui_mode".to_string(), "embedded".to_string()),
        ("mode".to_string(), "payment".to_string()),
        ("return_url".to_string(), session.return_url.clone()),
    ];

    for (i, item) in session.line_items.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((
            format!("{prefix}[price_data][currency]"),
            session.currency.to_string(),
        ));
        form.push((
            format!("{prefix}[price_data][product_data][name]"),
            item.name.clone(),
        ));
        form.push((
            format!("{prefix}[price_data][unit_amount]"),
            item.unit_amount.to_string(),
        ));
        form.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
    }

    for (key, value) in &session.metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
    }

    form
}

/// Splits a long value across `key_0`, `key_1`, ... metadata entries.
pub fn chunk_metadata(key: &str, value: &str) -> Vec<(String, String)> {
    let chars: Vec<char> = value.chars().collect();
    if chars.is_empty() {
        return vec![(format!("{key}_0"), String::new())];
    }
    chars
        .chunks(METADATA_VALUE_LIMIT)
        .enumerate()
        .map(|(i, chunk)| (format!("{key}_{i}"), chunk.iter().collect()))
        .collect()
}

/// Reassembles a value written by [`chunk_metadata`].
pub fn join_metadata(metadata: &HashMap<String, String>, key: &str) -> Option<String> {
    let mut joined = String::new();
    let mut found = false;
    for i in 0.. {
        match metadata.get(&format!("{key}_{i}")) {
            Some(part) => {
                joined.push_str(part);
                found = true;
            }
            None => break,
        }
    }
    found.then_some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_chunks_round_trip_long_values() {
        let value = "x".repeat(1_234);
        let chunks = chunk_metadata("cart", &value);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|(_, v)| v.len() <= METADATA_VALUE_LIMIT));

        let metadata: HashMap<_, _> = chunks.into_iter().collect();
        assert_eq!(join_metadata(&metadata, "cart").as_deref(), Some(value.as_str()));
        assert_eq!(join_metadata(&metadata, "missing"), None);
    }

    #[test]
    fn form_uses_bracketed_line_items() {
        let form = checkout_form(&NewCheckoutSession {
            line_items: vec![LineItem {
                name: "Mug".into(),
                unit_amount: 1200,
                quantity: 2,
            }],
            return_url: "http://localhost/return".into(),
            currency: "usd",
            metadata: vec![("user_id".into(), "abc".into())],
        });

        assert!(form.contains(&("line_items[0][price_data][unit_amount]".into(), "1200".into())));
        assert!(form.contains(&("line_items[0][quantity]".into(), "2".into())));
        assert!(form.contains(&("metadata[user_id]".into(), "abc".into())));
    }
}
