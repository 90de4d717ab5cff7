//! Single-flight access-token refresh.
//!
//! Any number of requests may discover an expired access token at once. The
//! first one starts a refresh on a spawned task; the rest queue behind it and
//! are released in arrival order with the same outcome. A failed refresh
//! clears the stored credentials so nothing keeps using the stale token.

use std::{
    future::Future,
    mem,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
};

use thiserror::Error;
use tokio::sync::oneshot;

use super::tokens::TokenStore;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("no refresh token available")]
    MissingRefreshToken,

    #[error("refresh rejected: {0}")]
    Rejected(String),

    #[error("refresh transport error: {0}")]
    Transport(String),

    #[error("refresh task ended without a result")]
    Aborted,
}

/// Exchanges a refresh token for a new access token.
pub trait TokenRefresher: Send + Sync + 'static {
    fn refresh(&self, refresh_token: String) -> BoxFuture<'_, Result<String, RefreshError>>;
}

type Waiter = oneshot::Sender<Result<String, RefreshError>>;

enum RefreshState {
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

#[derive(Clone)]
pub struct RefreshCoalescer {
    inner: Arc<Inner>,
}

struct Inner {
    refresher: Arc<dyn TokenRefresher>,
    tokens: TokenStore,
    state: Mutex<RefreshState>,
}

impl RefreshCoalescer {
    pub fn new(refresher: Arc<dyn TokenRefresher>, tokens: TokenStore) -> Self {
        Self {
            inner: Arc::new(Inner {
                refresher,
                tokens,
                state: Mutex::new(RefreshState::Idle),
            }),
        }
    }

    /// Number of callers currently waiting on an in-flight refresh.
    pub fn waiting(&self) -> usize {
        match &*self.inner.lock_state() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Returns a usable access token for a request that was rejected with
    /// `stale`. If the stored token already differs from `stale` another
    /// caller has refreshed it and it is returned without a new refresh.
    pub async fn refresh_after(&self, stale: &str) -> Result<String, RefreshError> {
        let (tx, rx) = oneshot::channel();
        let start = {
            let mut state = self.inner.lock_state();
            if let Some(current) = self.inner.tokens.access_token() {
                if current != stale {
                    return Ok(current);
                }
            }
            match &mut *state {
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing { waiters: vec![tx] };
                    true
                }
                RefreshState::Refreshing { waiters } => {
                    waiters.push(tx);
                    false
                }
            }
        };

        if start {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run().await });
        }

        rx.await.unwrap_or(Err(RefreshError::Aborted))
    }
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(&self) {
        let result = match self.tokens.refresh_token() {
            Some(refresh_token) => self.refresher.refresh(refresh_token).await,
            None => Err(RefreshError::MissingRefreshToken),
        };

        match &result {
            Ok(access) => {
                self.tokens.set_access(access.clone());
                tracing::debug!("access token refreshed");
            }
            Err(err) => {
                self.tokens.clear();
                tracing::warn!(error = %err, "access token refresh failed, credentials cleared");
            }
        }

        let waiters = match mem::replace(&mut *self.lock_state(), RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        };
        for waiter in waiters {
            // A dropped receiver means the request was cancelled.
            let _ = waiter.send(result.clone());
        }
    }
}
