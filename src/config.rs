use std::env;

use anyhow::Context;
use secrecy::SecretString;

const DEFAULT_CLIENT_URL: &str = "http://localhost:5173";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_PAYPAL_API_BASE: &str = "https://api-m.sandbox.paypal.com";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Public origin of the storefront UI, used for payment return and reset links.
    pub client_url: String,
    pub jwt: JwtConfig,
    pub stripe: StripeConfig,
    pub paypal: PaypalConfig,
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: Option<SecretString>,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl AppConfig {
    /// Local defaults with both payment processors and SMTP disabled.
    pub fn new(database_url: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            client_url: DEFAULT_CLIENT_URL.to_string(),
            jwt: JwtConfig {
                secret: SecretString::from(jwt_secret.into()),
                access_ttl_minutes: 15,
                refresh_ttl_days: 7,
            },
            stripe: StripeConfig {
                secret_key: None,
                api_base: DEFAULT_STRIPE_API_BASE.to_string(),
            },
            paypal: PaypalConfig {
                client_id: None,
                client_secret: None,
                api_base: DEFAULT_PAYPAL_API_BASE.to_string(),
            },
            smtp: None,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_or("APP_PORT", 3000);
        let client_url = env::var("CLIENT_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_CLIENT_URL.to_string());

        let jwt = JwtConfig {
            secret: env::var("JWT_SECRET")
                .map(SecretString::from)
                .context("JWT_SECRET is not set")?,
            access_ttl_minutes: parse_or("ACCESS_TOKEN_TTL_MINUTES", 15),
            refresh_ttl_days: parse_or("REFRESH_TOKEN_TTL_DAYS", 7),
        };

        let stripe = StripeConfig {
            secret_key: optional("STRIPE_SECRET_KEY").map(SecretString::from),
            api_base: optional("STRIPE_API_BASE")
                .unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_string()),
        };

        let paypal = PaypalConfig {
            client_id: optional("PAYPAL_CLIENT_ID"),
            client_secret: optional("PAYPAL_CLIENT_SECRET").map(SecretString::from),
            api_base: optional("PAYPAL_API_BASE")
                .unwrap_or_else(|| DEFAULT_PAYPAL_API_BASE.to_string()),
        };

        let smtp = match (
            optional("SMTP_HOST"),
            optional("SMTP_USERNAME"),
            optional("SMTP_PASSWORD"),
        ) {
            (Some(host), Some(username), Some(password)) => Some(SmtpConfig {
                from_address: optional("EMAIL_FROM").unwrap_or_else(|| username.clone()),
                host,
                port: parse_or("SMTP_PORT", 587),
                username,
                password: SecretString::from(password),
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            host,
            port,
            client_url,
            jwt,
            stripe,
            paypal,
            smtp,
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
