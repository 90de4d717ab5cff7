use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use storefront_api::client::{
    BoxFuture, RefreshCoalescer, RefreshError, TokenRefresher, TokenStore,
};
use tokio::sync::Notify;

const WAITERS: usize = 8;

/// Refresher that blocks until released and counts upstream calls.
struct GatedRefresher {
    calls: AtomicUsize,
    gate: Notify,
    outcome: Result<String, RefreshError>,
}

impl GatedRefresher {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenRefresher for GatedRefresher {
    fn refresh(&self, refresh_token: String) -> BoxFuture<'_, Result<String, RefreshError>> {
        Box::pin(async move {
            assert_eq!(refresh_token, "refresh-1");
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.outcome.clone()
        })
    }
}

fn setup(
    outcome: Result<String, RefreshError>,
) -> (Arc<GatedRefresher>, TokenStore, RefreshCoalescer) {
    let refresher = Arc::new(GatedRefresher {
        calls: AtomicUsize::new(0),
        gate: Notify::new(),
        outcome,
    });
    let tokens = TokenStore::new();
    tokens.set("stale", "refresh-1");
    let coalescer = RefreshCoalescer::new(refresher.clone(), tokens.clone());
    (refresher, tokens, coalescer)
}

/// Starts `WAITERS` callers that all saw `stale` rejected, waits until every
/// one is queued, then lets the single refresh finish. Returns the callers in
/// the order they resumed.
async fn run_burst(
    refresher: &GatedRefresher,
    coalescer: &RefreshCoalescer,
) -> Vec<(usize, Result<String, RefreshError>)> {
    let resumed = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    for i in 0..WAITERS {
        let task_coalescer = coalescer.clone();
        let resumed = resumed.clone();
        handles.push(tokio::spawn(async move {
            let result = task_coalescer.refresh_after("stale").await;
            resumed.lock().unwrap().push((i, result));
        }));
        while coalescer.waiting() < i + 1 {
            tokio::task::yield_now().await;
        }
    }

    while refresher.calls() == 0 {
        tokio::task::yield_now().await;
    }
    refresher.gate.notify_one();

    for handle in handles {
        handle.await.unwrap();
    }
    std::mem::take(&mut *resumed.lock().unwrap())
}

#[tokio::test]
async fn concurrent_expiries_share_one_refresh() {
    let (refresher, tokens, coalescer) = setup(Ok("fresh".to_string()));

    let resumed = run_burst(&refresher, &coalescer).await;

    assert_eq!(refresher.calls(), 1);
    assert_eq!(resumed.len(), WAITERS);
    assert!(resumed.iter().all(|(_, r)| r.as_deref() == Ok("fresh")));
    assert_eq!(tokens.access_token().as_deref(), Some("fresh"));
    assert_eq!(tokens.refresh_token().as_deref(), Some("refresh-1"));
    assert_eq!(coalescer.waiting(), 0);
}

#[tokio::test]
async fn waiters_resume_in_arrival_order() {
    let (refresher, _tokens, coalescer) = setup(Ok("fresh".to_string()));

    let resumed = run_burst(&refresher, &coalescer).await;

    let order: Vec<usize> = resumed.iter().map(|(i, _)| *i).collect();
    assert_eq!(order, (0..WAITERS).collect::<Vec<_>>());
}

#[tokio::test]
async fn failed_refresh_fails_every_waiter_and_drops_credentials() {
    let (refresher, tokens, coalescer) =
        setup(Err(RefreshError::Rejected("refresh token revoked".into())));

    let resumed = run_burst(&refresher, &coalescer).await;

    assert_eq!(refresher.calls(), 1);
    assert!(resumed.iter().all(|(_, r)| matches!(r, Err(RefreshError::Rejected(_)))));
    assert_eq!(tokens.access_token(), None);
    assert_eq!(tokens.refresh_token(), None);

    // Nothing left to refresh with.
    let again = coalescer.refresh_after("stale").await;
    assert_eq!(again, Err(RefreshError::MissingRefreshToken));
    assert_eq!(refresher.calls(), 1);
}

#[tokio::test]
async fn later_expiry_reuses_refreshed_token() {
    let (refresher, _tokens, coalescer) = setup(Ok("fresh".to_string()));
    run_burst(&refresher, &coalescer).await;

    // A request that was still in flight with the old token.
    let token = coalescer.refresh_after("stale").await;
    assert_eq!(token.as_deref(), Ok("fresh"));
    assert_eq!(refresher.calls(), 1);
    assert_eq!(coalescer.waiting(), 0);
}
