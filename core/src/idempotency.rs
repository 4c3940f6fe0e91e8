use crate::bus::Handler;
use crate::context::Context;
use crate::error::CoreError;
use crate::events::DomainEvent;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Key-scoped at-most-once execution tracker with in-flight coalescing.
///
/// Process-wide and concurrency-safe: multiple handlers, possibly from
/// different flows, share one tracker instance. `processed` marks keys
/// whose effect already ran to completion; `in_flight` coalesces
/// concurrent duplicate attempts on a key that hasn't finished yet so
/// they all observe the same outcome instead of racing the inner handler.
pub struct IdempotencyTracker {
    processed: DashMap<String, Option<Instant>>,
    in_flight: DashMap<String, Arc<watch::Sender<Option<Result<(), CoreError>>>>>,
    ttl: Option<Duration>,
    enabled: bool,
}

impl Default for IdempotencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl IdempotencyTracker {
    pub fn new() -> Self {
        Self {
            processed: DashMap::new(),
            in_flight: DashMap::new(),
            ttl: None,
            enabled: true,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            processed: DashMap::new(),
            in_flight: DashMap::new(),
            ttl: Some(ttl),
            enabled: true,
        }
    }

    /// Builds a tracker from `CoreConfig`'s idempotency fields: `enabled`
    /// gates tracking outright (every call behaves like an empty-key
    /// bypass), `ttl` bounds how long a processed key is remembered.
    pub fn from_config(enabled: bool, ttl: Option<Duration>) -> Self {
        Self {
            processed: DashMap::new(),
            in_flight: DashMap::new(),
            ttl,
            enabled,
        }
    }

    pub fn store(&self, key: &str) {
        let expiry = self.ttl.map(|ttl| Instant::now() + ttl);
        self.processed.insert(key.to_string(), expiry);
    }

    pub fn delete(&self, key: &str) {
        self.processed.remove(key);
    }

    pub fn is_processed(&self, key: &str) -> bool {
        let Some(entry) = self.processed.get(key) else {
            return false;
        };
        match *entry {
            Some(expiry) if expiry <= Instant::now() => {
                drop(entry);
                self.processed.remove(key);
                false
            }
            _ => true,
        }
    }

    /// Runs `f` at most once per `key` across the tracker's lifetime,
    /// provided prior attempts succeeded. Concurrent callers on the same
    /// key coalesce onto whichever attempt is in flight and all observe
    /// its exact outcome; a failed attempt does not mark the key
    /// processed, so a later call may retry it.
    pub async fn run<F, Fut>(&self, key: &str, f: F) -> Result<(), CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), CoreError>>,
    {
        if !self.enabled || key.is_empty() {
            return f().await;
        }

        if self.is_processed(key) {
            return Ok(());
        }

        enum Role {
            Leader(Arc<watch::Sender<Option<Result<(), CoreError>>>>),
            Follower(watch::Receiver<Option<Result<(), CoreError>>>),
        }

        let role = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => Role::Follower(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, _rx) = watch::channel(None);
                let tx = Arc::new(tx);
                entry.insert(tx.clone());
                Role::Leader(tx)
            }
        };

        match role {
            Role::Leader(tx) => {
                // Re-check: another leader may have stored the key and
                // cleaned up its in-flight entry between our first check
                // and winning the entry race above.
                if self.is_processed(key) {
                    self.in_flight.remove(key);
                    let _ = tx.send(Some(Ok(())));
                    return Ok(());
                }

                let result = f().await;
                if result.is_ok() {
                    self.store(key);
                }
                self.in_flight.remove(key);
                let _ = tx.send(Some(result.clone()));
                result
            }
            Role::Follower(mut rx) => loop {
                if let Some(result) = rx.borrow().clone() {
                    return result;
                }
                if rx.changed().await.is_err() {
                    // Leader's sender dropped without a final send; treat as
                    // a transient failure so the caller can retry.
                    return Err(CoreError::Transient(format!(
                        "idempotency leader for key {key} vanished"
                    )));
                }
            },
        }
    }
}

/// Wraps a `Handler` so its effects run at most once per key, per
/// `IdempotencyTracker::run`. `key_extractor` derives the key from the
/// event; an empty key bypasses tracking entirely.
pub struct IdempotentHandler<K> {
    name: &'static str,
    tracker: Arc<IdempotencyTracker>,
    inner: Arc<dyn Handler>,
    key_extractor: K,
}

impl<K> IdempotentHandler<K>
where
    K: Fn(&DomainEvent) -> String + Send + Sync + 'static,
{
    pub fn new(
        name: &'static str,
        tracker: Arc<IdempotencyTracker>,
        inner: Arc<dyn Handler>,
        key_extractor: K,
    ) -> Self {
        Self {
            name,
            tracker,
            inner,
            key_extractor,
        }
    }
}

#[async_trait]
impl<K> Handler for IdempotentHandler<K>
where
    K: Fn(&DomainEvent) -> String + Send + Sync,
{
    async fn handle(&self, ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let key = (self.key_extractor)(event);
        debug!(handler = self.name, key = %key, "idempotency-wrapped handler invoked");

        let inner = self.inner.clone();
        let ctx = ctx.clone();
        let event = event.clone();

        self.tracker
            .run(&key, move || async move { inner.handle(&ctx, &event).await })
            .await
    }
}

/// Wraps `inner` with idempotency tracking, keyed by `key_extractor`.
pub fn with_idempotency<K>(
    name: &'static str,
    tracker: Arc<IdempotencyTracker>,
    inner: Arc<dyn Handler>,
    key_extractor: K,
) -> Arc<dyn Handler>
where
    K: Fn(&DomainEvent) -> String + Send + Sync + 'static,
{
    Arc::new(IdempotentHandler::new(name, tracker, inner, key_extractor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Envelope, FlowType, PaymentFailed};
    use common::ids::{AccountId, UserId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn sample_event() -> DomainEvent {
        let envelope = Envelope::root(FlowType::Payment, UserId::new(), AccountId::new());
        DomainEvent::PaymentFailed(PaymentFailed {
            envelope,
            payment_id: None,
            reason: "test".to_string(),
        })
    }

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        outcome: Arc<Mutex<Result<(), CoreError>>>,
    }

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(&self, _ctx: &Context, _event: &DomainEvent) -> Result<(), CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn repeated_keys_invoke_inner_handler_at_most_once() {
        let tracker = Arc::new(IdempotencyTracker::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(CountingHandler {
            calls: calls.clone(),
            outcome: Arc::new(Mutex::new(Ok(()))),
        });

        let wrapped = with_idempotency("test", tracker, inner, |_event| "fixed-key".to_string());

        for _ in 0..5 {
            wrapped.handle(&Context::new(), &sample_event()).await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_tracker_invokes_inner_handler_every_time() {
        let tracker = Arc::new(IdempotencyTracker::from_config(false, None));
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(CountingHandler {
            calls: calls.clone(),
            outcome: Arc::new(Mutex::new(Ok(()))),
        });

        let wrapped = with_idempotency("test", tracker, inner, |_event| "fixed-key".to_string());

        for _ in 0..3 {
            wrapped.handle(&Context::new(), &sample_event()).await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_key_bypasses_tracking() {
        let tracker = Arc::new(IdempotencyTracker::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(CountingHandler {
            calls: calls.clone(),
            outcome: Arc::new(Mutex::new(Ok(()))),
        });

        let wrapped = with_idempotency("test", tracker, inner, |_event| String::new());

        wrapped.handle(&Context::new(), &sample_event()).await.unwrap();
        wrapped.handle(&Context::new(), &sample_event()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_attempts_are_not_marked_processed() {
        let tracker = Arc::new(IdempotencyTracker::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = Arc::new(Mutex::new(Err(CoreError::Transient("nope".to_string()))));
        let inner = Arc::new(CountingHandler {
            calls: calls.clone(),
            outcome: outcome.clone(),
        });

        let wrapped = with_idempotency("test", tracker, inner, |_event| "retry-key".to_string());

        assert!(wrapped.handle(&Context::new(), &sample_event()).await.is_err());
        assert!(wrapped.handle(&Context::new(), &sample_event()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        *outcome.lock().unwrap() = Ok(());
        assert!(wrapped.handle(&Context::new(), &sample_event()).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn concurrent_duplicates_observe_the_same_outcome() {
        let tracker = Arc::new(IdempotencyTracker::new());

        struct SlowFailingHandler {
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Handler for SlowFailingHandler {
            async fn handle(&self, _ctx: &Context, _event: &DomainEvent) -> Result<(), CoreError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Err(CoreError::InvariantViolation("insufficient funds".to_string()))
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(SlowFailingHandler { calls: calls.clone() });
        let wrapped = with_idempotency("test", tracker, inner, |_event| "shared-key".to_string());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let wrapped = wrapped.clone();
            handles.push(tokio::spawn(async move {
                wrapped.handle(&Context::new(), &sample_event()).await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1, "only the leader should invoke the inner handler");
        assert!(results.iter().all(|r| r.is_err()), "every duplicate must observe the same failure");
    }
}
