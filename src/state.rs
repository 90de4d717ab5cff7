use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::{DbPool, OrmConn, orm_from_pool},
    payments::PaymentClients,
    services::{email::Mailer, token_service::TokenKeys},
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub config: Arc<AppConfig>,
    pub tokens: Arc<TokenKeys>,
    pub payments: PaymentClients,
    pub mailer: Mailer,
}

impl AppState {
    pub fn new(pool: DbPool, config: AppConfig) -> anyhow::Result<Self> {
        let orm = orm_from_pool(&pool);
        let tokens = Arc::new(TokenKeys::new(&config.jwt));
        let payments = PaymentClients::from_config(&config)?;
        let mailer = Mailer::new(config.smtp.as_ref())?;

        Ok(Self {
            pool,
            orm,
            config: Arc::new(config),
            tokens,
            payments,
            mailer,
        })
    }
}
