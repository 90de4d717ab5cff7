//! Outgoing transactional mail (address verification and password-reset links).
//!
//! Without SMTP settings the mailer runs in log-only mode so local setups can
//! still follow a link by copying it from the server log.

use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::header::ContentType,
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;

use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),
}

#[derive(Clone)]
pub struct Mailer {
    transport: Option<SmtpTransport>,
}

#[derive(Clone)]
struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl Mailer {
    pub fn new(config: Option<&SmtpConfig>) -> Result<Self, EmailError> {
        let transport = match config {
            Some(config) => {
                let credentials = Credentials::new(
                    config.username.clone(),
                    config.password.expose_secret().to_string(),
                );
                let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
                    .port(config.port)
                    .credentials(credentials)
                    .build();
                Some(SmtpTransport {
                    mailer,
                    from_address: config.from_address.clone(),
                })
            }
            None => {
                tracing::warn!("SMTP not configured, e-mailed links will only be logged");
                None
            }
        };
        Ok(Self { transport })
    }

    /// A mailer that never connects anywhere.
    pub fn log_only() -> Self {
        Self { transport: None }
    }

    pub async fn send_verification(
        &self,
        to: &str,
        first_name: &str,
        verify_link: &str,
    ) -> Result<(), EmailError> {
        let body = format!(
            "Welcome, {first_name}!\n\n\
             Please confirm your email address to finish creating your account:\n\n\
             {verify_link}\n\n\
             The link expires in 24 hours. If you did not sign up you can ignore this message.\n"
        );
        self.send(to, "Verify your email address", body, verify_link)
            .await
    }

    pub async fn send_password_reset(
        &self,
        to: &str,
        first_name: &str,
        reset_link: &str,
    ) -> Result<(), EmailError> {
        let body = format!(
            "Hi {first_name},\n\n\
             We received a request to reset your password. Open the link below to choose a new one:\n\n\
             {reset_link}\n\n\
             The link expires in one hour. If you did not ask for a reset you can ignore this message.\n"
        );
        self.send(to, "Reset your password", body, reset_link).await
    }

    async fn send(
        &self,
        to: &str,
        subject: &str,
        body: String,
        link: &str,
    ) -> Result<(), EmailError> {
        let Some(transport) = &self.transport else {
            tracing::info!(to = %to, subject, link = %link, "email link (SMTP disabled)");
            return Ok(());
        };

        let email = Message::builder()
            .from(
                transport
                    .from_address
                    .parse()
                    .map_err(|_| EmailError::InvalidAddress(transport.from_address.clone()))?,
            )
            .to(to
                .parse()
                .map_err(|_| EmailError::InvalidAddress(to.to_string()))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;

        transport.mailer.send(email).await?;

        tracing::info!(to = %to, subject, "email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_only_mailer_accepts_messages() {
        let mailer = Mailer::log_only();
        mailer
            .send_password_reset("jane@example.com", "Jane", "http://localhost/reset-password?token=t")
            .await
            .unwrap();
        mailer
            .send_verification("jane@example.com", "Jane", "http://localhost/verify-email?token=t")
            .await
            .unwrap();
    }
}
