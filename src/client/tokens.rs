use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

/// Credentials shared by an [`ApiClient`](super::ApiClient) and its refresh
/// coalescer. The lock is never held across an await point.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    inner: Arc<RwLock<Tokens>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, access: impl Into<String>, refresh: impl Into<String>) {
        let mut tokens = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        tokens.access = Some(access.into());
        tokens.refresh = Some(refresh.into());
    }

    pub fn set_access(&self, access: impl Into<String>) {
        let mut tokens = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        tokens.access = Some(access.into());
    }

    /// Drops both credentials.
    pub fn clear(&self) {
        let mut tokens = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        tokens.access = None;
        tokens.refresh = None;
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .access
            .clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .refresh
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_credentials() {
        let store = TokenStore::new();
        let other = store.clone();
        store.set("a1", "r1");
        assert_eq!(other.access_token().as_deref(), Some("a1"));

        other.set_access("a2");
        assert_eq!(store.access_token().as_deref(), Some("a2"));
        assert_eq!(store.refresh_token().as_deref(), Some("r1"));

        store.clear();
        assert_eq!(other.access_token(), None);
        assert_eq!(other.refresh_token(), None);
    }
}
