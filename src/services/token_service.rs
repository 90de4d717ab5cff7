use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use secrecy::ExposeSecret;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::JwtConfig,
    dto::auth::{Claims, TokenKind},
};

/// Lifetime of a password-reset link.
const RESET_TTL_MINUTES: i64 = 60;
/// Lifetime of an address-verification link.
const VERIFY_TTL_HOURS: i64 = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

pub struct IssuedToken {
    pub token: String,
    pub jti: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies the HS256 tokens handed to clients.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenKeys {
    pub fn new(config: &JwtConfig) -> Self {
        let secret = config.secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            access_ttl: Duration::minutes(config.access_ttl_minutes),
            refresh_ttl: Duration::days(config.refresh_ttl_days),
        }
    }

    pub fn issue_access(&self, user_id: Uuid, role: &str) -> Result<IssuedToken, TokenError> {
        self.issue(user_id, role, TokenKind::Access, self.access_ttl, None)
    }

    pub fn issue_refresh(&self, user_id: Uuid, role: &str) -> Result<IssuedToken, TokenError> {
        self.issue(
            user_id,
            role,
            TokenKind::Refresh,
            self.refresh_ttl,
            Some(Uuid::new_v4()),
        )
    }

    pub fn issue_reset(&self, user_id: Uuid, role: &str) -> Result<IssuedToken, TokenError> {
        self.issue(
            user_id,
            role,
            TokenKind::Reset,
            Duration::minutes(RESET_TTL_MINUTES),
            Some(Uuid::new_v4()),
        )
    }

    pub fn issue_verify(&self, user_id: Uuid, role: &str) -> Result<IssuedToken, TokenError> {
        self.issue(
            user_id,
            role,
            TokenKind::Verify,
            Duration::hours(VERIFY_TTL_HOURS),
            Some(Uuid::new_v4()),
        )
    }

    /// Verifies signature, expiry and that the token is of the expected kind.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;

        if data.claims.typ != expected {
            return Err(TokenError::Invalid);
        }
        Ok(data.claims)
    }

    fn issue(
        &self,
        user_id: Uuid,
        role: &str,
        typ: TokenKind,
        ttl: Duration,
        jti: Option<Uuid>,
    ) -> Result<IssuedToken, TokenError> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| TokenError::Signing("expiration overflow".into()))?;

        let claims = Claims {
            sub: user_id.to_string(),
            role: role.to_string(),
            typ,
            exp: expires_at.timestamp() as usize,
            iat: now.timestamp() as usize,
            jti: jti.map(|id| id.to_string()),
        };

        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken {
            token,
            jti,
            expires_at,
        })
    }
}
