//! Topic fan-out.
//!
//! ```text
//! publish(topic, payload)
//!     │
//!     ├── store.list_by_topic(topic)        ── error → StoreUnavailable
//!     │
//!     ├── for each subscriber (≤ max_concurrent in flight)
//!     │       sign → deliver → classify
//!     │       Gone → store.delete_by_endpoint
//!     │
//!     └── join all → PublishTally { sent, failed }
//! ```
//!
//! Per-subscriber failures never escape the fan-out. Once the subscriber
//! list is loaded, `publish` always returns a tally.

// Rust guideline compliant 2026-02

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::classify::{classify_outcome, DeliveryOutcome};
use super::push::{NotificationPayload, PushTransport};
use super::signer::TokenSigner;
use crate::error::{PushError, PushResult};
use crate::store::{SubscriberRecord, SubscriberStore};

/// Default ceiling on in-flight deliveries per publish.
pub const DEFAULT_MAX_CONCURRENT_PUSHES: usize = 10;

/// Result of one publish.
///
/// `sent + failed` always equals the number of subscribers loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTally {
    /// Deliveries the provider accepted.
    pub sent: usize,
    /// Deliveries that were gone or transiently failed.
    pub failed: usize,
    /// Subscriber records removed because their endpoint is gone.
    #[serde(skip)]
    pub pruned: usize,
}

impl PublishTally {
    /// Number of attempts accounted for.
    pub fn total(&self) -> usize {
        self.sent + self.failed
    }

    fn record(&mut self, report: &DeliveryReport) {
        if report.outcome.is_delivered() {
            self.sent += 1;
        } else {
            self.failed += 1;
        }
        if report.pruned {
            self.pruned += 1;
        }
    }
}

/// What happened to one subscriber during a publish.
#[derive(Debug, Clone)]
struct DeliveryReport {
    outcome: DeliveryOutcome,
    pruned: bool,
}

/// Orchestrates publishes over a store, a signer and a transport.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<dyn SubscriberStore>,
    transport: Arc<dyn PushTransport>,
    signer: Arc<TokenSigner>,
    max_concurrent: usize,
}

impl Dispatcher {
    /// Create a dispatcher with the default concurrency ceiling.
    pub fn new(
        store: Arc<dyn SubscriberStore>,
        transport: Arc<dyn PushTransport>,
        signer: Arc<TokenSigner>,
    ) -> Self {
        Self {
            store,
            transport,
            signer,
            max_concurrent: DEFAULT_MAX_CONCURRENT_PUSHES,
        }
    }

    /// Override the in-flight ceiling. Zero is treated as one.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Current in-flight ceiling.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// The signer, for exposing the public key to subscribers.
    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Deliver `payload` to every subscriber of `topic`.
    ///
    /// Fails only if the subscriber list cannot be loaded.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &NotificationPayload,
    ) -> PushResult<PublishTally> {
        let subscribers = self.store.list_by_topic(topic).await?;
        if subscribers.is_empty() {
            log::info!("[WebPush] No subscriptions found for topic '{}'", topic);
            return Ok(PublishTally::default());
        }

        let body: Arc<[u8]> = payload.to_bytes().map_err(PushError::from)?.into();
        let expected = subscribers.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for subscriber in subscribers {
            let semaphore = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            let transport = Arc::clone(&self.transport);
            let signer = Arc::clone(&self.signer);
            let body = Arc::clone(&body);

            tasks.spawn(async move {
                // The semaphore is never closed; an error here would mean
                // the permit pool is gone, so treat the attempt as failed.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return DeliveryReport {
                        outcome: DeliveryOutcome::Transient,
                        pruned: false,
                    };
                };
                deliver_one(store.as_ref(), transport.as_ref(), &signer, &subscriber, &body).await
            });
        }

        let mut tally = PublishTally::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => tally.record(&report),
                Err(e) => {
                    log::error!("[WebPush] Delivery task aborted: {}", e);
                    tally.failed += 1;
                }
            }
        }
        debug_assert_eq!(tally.total(), expected);

        log::info!(
            "[WebPush] Published to topic '{}': sent={}, failed={}, pruned={}",
            topic,
            tally.sent,
            tally.failed,
            tally.pruned
        );
        Ok(tally)
    }
}

/// Sign, deliver and classify one attempt, pruning the record if gone.
async fn deliver_one(
    store: &dyn SubscriberStore,
    transport: &dyn PushTransport,
    signer: &TokenSigner,
    subscriber: &SubscriberRecord,
    body: &[u8],
) -> DeliveryReport {
    let endpoint = subscriber.endpoint.as_str();

    let assertion = match signer.sign_for_endpoint(endpoint) {
        Ok(assertion) => assertion,
        Err(e) => {
            log::warn!("[WebPush] Failed to sign for {}: {}", endpoint, e);
            return DeliveryReport {
                outcome: DeliveryOutcome::Transient,
                pruned: false,
            };
        }
    };

    let result = transport.deliver(subscriber, body, &assertion).await;
    let outcome = classify_outcome(&result);

    match (&result, outcome) {
        (_, DeliveryOutcome::Delivered) => {
            log::debug!("[WebPush] Delivered to {}", endpoint);
        }
        (_, DeliveryOutcome::Gone) => {
            log::info!("[WebPush] Subscription expired (410 Gone), removing {}", endpoint);
        }
        (Ok(response), DeliveryOutcome::Transient) => {
            log::warn!(
                "[WebPush] Push service returned {} for {}: {}",
                response.status,
                endpoint,
                response.detail.as_deref().unwrap_or("<empty body>")
            );
        }
        (Err(e), DeliveryOutcome::Transient) => {
            log::warn!("[WebPush] Failed to send notification to {}: {}", endpoint, e);
        }
    }

    let mut pruned = false;
    if outcome.should_prune() {
        match store.delete_by_endpoint(endpoint).await {
            Ok(removed) => pruned = removed > 0,
            Err(e) => log::warn!("[WebPush] Failed to delete subscription {}: {}", endpoint, e),
        }
    }

    DeliveryReport { outcome, pruned }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::push::{PushResponse, TransportError};
    use crate::notifications::provider::TokenLifetimes;
    use crate::notifications::signer::Assertion;
    use crate::notifications::vapid::VapidKeys;
    use crate::store::{KeyMaterial, MemoryStore, StoreError, StoreResult, TopicSummary};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted transport that records concurrency and calls.
    #[derive(Debug, Default)]
    struct FakeTransport {
        statuses: HashMap<String, Result<u16, ()>>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        audiences: Mutex<Vec<(String, String)>>,
    }

    impl FakeTransport {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn script(mut self, endpoint: &str, status: Result<u16, ()>) -> Self {
            self.statuses.insert(endpoint.to_string(), status);
            self
        }
    }

    #[async_trait]
    impl PushTransport for FakeTransport {
        async fn deliver(
            &self,
            subscriber: &SubscriberRecord,
            _payload: &[u8],
            assertion: &Assertion,
        ) -> Result<PushResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.audiences
                .lock()
                .unwrap()
                .push((subscriber.endpoint.clone(), assertion.audience.clone()));

            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.statuses.get(&subscriber.endpoint).copied().unwrap_or(Ok(201)) {
                Ok(status) => Ok(PushResponse { status, detail: None }),
                Err(()) => Err(TransportError::Timeout),
            }
        }
    }

    /// Store whose reads always fail.
    #[derive(Debug)]
    struct BrokenStore;

    #[async_trait]
    impl SubscriberStore for BrokenStore {
        async fn list_by_topic(&self, _topic: &str) -> StoreResult<Vec<SubscriberRecord>> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }
        async fn upsert(&self, _: &str, _: &str, _: KeyMaterial) -> StoreResult<()> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }
        async fn delete_by_endpoint(&self, _: &str) -> StoreResult<u64> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }
        async fn unsubscribe(&self, _: &str, _: &str) -> StoreResult<bool> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }
        async fn delete_topic(&self, _: &str) -> StoreResult<u64> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }
        async fn list_topics(&self) -> StoreResult<Vec<TopicSummary>> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }
    }

    /// Store that lists normally but cannot delete.
    #[derive(Debug, Default)]
    struct ReadOnlyStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl SubscriberStore for ReadOnlyStore {
        async fn list_by_topic(&self, topic: &str) -> StoreResult<Vec<SubscriberRecord>> {
            self.inner.list_by_topic(topic).await
        }
        async fn upsert(&self, topic: &str, endpoint: &str, keys: KeyMaterial) -> StoreResult<()> {
            self.inner.upsert(topic, endpoint, keys).await
        }
        async fn delete_by_endpoint(&self, _: &str) -> StoreResult<u64> {
            Err(StoreError::Unavailable("read-only".into()))
        }
        async fn unsubscribe(&self, _: &str, _: &str) -> StoreResult<bool> {
            Err(StoreError::Unavailable("read-only".into()))
        }
        async fn delete_topic(&self, _: &str) -> StoreResult<u64> {
            Err(StoreError::Unavailable("read-only".into()))
        }
        async fn list_topics(&self) -> StoreResult<Vec<TopicSummary>> {
            self.inner.list_topics().await
        }
    }

    fn signer() -> Arc<TokenSigner> {
        Arc::new(TokenSigner::new(
            Arc::new(VapidKeys::generate()),
            "mailto:ops@example.com",
            TokenLifetimes::default(),
        ))
    }

    fn keys() -> KeyMaterial {
        KeyMaterial {
            p256dh: "p256dh".into(),
            auth: "auth".into(),
        }
    }

    fn payload() -> NotificationPayload {
        NotificationPayload::new("Deploy", "v2 is live", None)
    }

    async fn store_with(topic: &str, endpoints: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for endpoint in endpoints {
            store.upsert(topic, endpoint, keys()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_alerts_example_tally_and_pruning() {
        let a = "https://push.example.com/a";
        let b = "https://push.example.com/b";
        let c = "https://push.example.com/c";
        let store = store_with("alerts", &[a, b, c]).await;
        let transport = Arc::new(
            FakeTransport::default()
                .script(a, Ok(410))
                .script(b, Ok(200))
                .script(c, Err(())),
        );

        let dispatcher = Dispatcher::new(store.clone(), transport, signer());
        let tally = dispatcher.publish("alerts", &payload()).await.unwrap();

        assert_eq!(tally.sent, 1);
        assert_eq!(tally.failed, 2);
        assert_eq!(tally.pruned, 1);
        assert!(!store.contains("alerts", a).await, "gone subscriber is pruned");
        assert!(store.contains("alerts", b).await);
        assert!(store.contains("alerts", c).await, "transient failure keeps subscriber");
    }

    #[tokio::test]
    async fn test_transient_statuses_never_prune() {
        let endpoints = [
            "https://push.example.com/400",
            "https://push.example.com/404",
            "https://push.example.com/429",
            "https://push.example.com/503",
        ];
        let store = store_with("alerts", &endpoints).await;
        let transport = Arc::new(
            FakeTransport::default()
                .script(endpoints[0], Ok(400))
                .script(endpoints[1], Ok(404))
                .script(endpoints[2], Ok(429))
                .script(endpoints[3], Ok(503)),
        );

        let tally = Dispatcher::new(store.clone(), transport, signer())
            .publish("alerts", &payload())
            .await
            .unwrap();

        assert_eq!(tally, PublishTally { sent: 0, failed: 4, pruned: 0 });
        assert_eq!(store.len().await, 4);
    }

    #[tokio::test]
    async fn test_empty_topic_makes_no_calls() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(FakeTransport::default());

        let tally = Dispatcher::new(store, transport.clone(), signer())
            .publish("nobody", &payload())
            .await
            .unwrap();

        assert_eq!(tally, PublishTally::default());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_is_respected() {
        let endpoints: Vec<String> = (0..40)
            .map(|i| format!("https://push.example.com/{i}"))
            .collect();
        let refs: Vec<&str> = endpoints.iter().map(String::as_str).collect();
        let store = store_with("alerts", &refs).await;
        let transport = Arc::new(FakeTransport::with_delay(Duration::from_millis(20)));

        let tally = Dispatcher::new(store, transport.clone(), signer())
            .with_max_concurrent(4)
            .publish("alerts", &payload())
            .await
            .unwrap();

        assert_eq!(tally.sent, 40);
        assert_eq!(tally.total(), 40);
        let peak = transport.peak.load(Ordering::SeqCst);
        assert!(peak <= 4, "peak in-flight was {peak}");
        assert!(peak > 1, "deliveries should overlap, peak was {peak}");
    }

    #[tokio::test]
    async fn test_sent_plus_failed_equals_subscribers() {
        let endpoints: Vec<String> = (0..25)
            .map(|i| format!("https://push.example.com/{i}"))
            .collect();
        let mut transport = FakeTransport::default();
        for (i, endpoint) in endpoints.iter().enumerate() {
            let status = match i % 4 {
                0 => Ok(201),
                1 => Ok(410),
                2 => Ok(500),
                _ => Err(()),
            };
            transport = transport.script(endpoint, status);
        }
        let refs: Vec<&str> = endpoints.iter().map(String::as_str).collect();
        let store = store_with("alerts", &refs).await;

        let tally = Dispatcher::new(store.clone(), Arc::new(transport), signer())
            .publish("alerts", &payload())
            .await
            .unwrap();

        assert_eq!(tally.total(), 25);
        assert_eq!(tally.sent, 7);
        assert_eq!(tally.pruned, 6);
        assert_eq!(store.len().await, 19);
    }

    #[tokio::test]
    async fn test_invalid_endpoint_counts_as_failed() {
        let store = store_with("alerts", &["not a url", "https://push.example.com/ok"]).await;
        let transport = Arc::new(FakeTransport::default());

        let tally = Dispatcher::new(store.clone(), transport.clone(), signer())
            .publish("alerts", &payload())
            .await
            .unwrap();

        assert_eq!(tally, PublishTally { sent: 1, failed: 1, pruned: 0 });
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(store.contains("alerts", "not a url").await);
    }

    #[tokio::test]
    async fn test_signing_failure_counts_as_failed() {
        // Parses as a URL, but is not a valid request URI, so signing fails.
        let unsignable = "https://push.example.com/has space";
        let ok = "https://push.example.com/ok";
        assert!(matches!(
            signer().sign_for_endpoint(unsignable),
            Err(PushError::SigningFailure(_))
        ));
        let store = store_with("alerts", &[unsignable, ok]).await;
        let transport = Arc::new(FakeTransport::default());

        let tally = Dispatcher::new(store.clone(), transport.clone(), signer())
            .publish("alerts", &payload())
            .await
            .unwrap();

        assert_eq!(tally, PublishTally { sent: 1, failed: 1, pruned: 0 });
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(store.contains("alerts", unsignable).await, "signing failure never prunes");
    }

    #[tokio::test]
    async fn test_prune_failure_still_returns_tally() {
        let gone = "https://push.example.com/gone";
        let ok = "https://push.example.com/ok";
        let store = Arc::new(ReadOnlyStore::default());
        store.upsert("alerts", gone, keys()).await.unwrap();
        store.upsert("alerts", ok, keys()).await.unwrap();
        let transport = Arc::new(FakeTransport::default().script(gone, Ok(410)));

        let tally = Dispatcher::new(store.clone(), transport, signer())
            .publish("alerts", &payload())
            .await
            .expect("a failed prune does not fail the publish");

        assert_eq!(tally, PublishTally { sent: 1, failed: 1, pruned: 0 });
        assert!(store.inner.contains("alerts", gone).await);
    }

    #[tokio::test]
    async fn test_apple_subscribers_get_apple_audience() {
        let apple = "https://web.push.apple.com/QGx7dfa";
        let fcm = "https://fcm.googleapis.com/fcm/send/abc";
        let store = store_with("alerts", &[apple, fcm]).await;
        let transport = Arc::new(FakeTransport::default());

        Dispatcher::new(store, transport.clone(), signer())
            .publish("alerts", &payload())
            .await
            .unwrap();

        let audiences: HashMap<String, String> =
            transport.audiences.lock().unwrap().iter().cloned().collect();
        assert_eq!(audiences[apple], "https://web.push.apple.com");
        assert_eq!(audiences[fcm], "https://fcm.googleapis.com");
    }

    #[tokio::test]
    async fn test_store_failure_is_operation_error() {
        let transport = Arc::new(FakeTransport::default());
        let err = Dispatcher::new(Arc::new(BrokenStore), transport.clone(), signer())
            .publish("alerts", &payload())
            .await
            .unwrap_err();

        assert!(matches!(err, PushError::StoreUnavailable(_)), "got {err}");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tally_serializes_sent_and_failed_only() {
        let tally = PublishTally { sent: 3, failed: 1, pruned: 1 };
        let json = serde_json::to_value(tally).unwrap();
        assert_eq!(json, serde_json::json!({ "sent": 3, "failed": 1 }));
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let dispatcher = Dispatcher::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FakeTransport::default()),
            signer(),
        )
        .with_max_concurrent(0);
        assert_eq!(dispatcher.max_concurrent(), 1);
    }
}
