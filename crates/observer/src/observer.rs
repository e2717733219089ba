//! The Observer.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chatsnapshot_core::{
    EventEnvelope, EventId, EventSource, EventType, Payload, SubscriptionId, Time,
};
use chatsnapshot_storage::EventStore;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::error::{ObserverError, Result};
use crate::subscriber::Subscriber;

/// Records facts into an [`EventStore`] and notifies live subscribers.
///
/// The store append is the commit point. Subscribers only hear about events
/// that were durably appended, and they only hear about events recorded after
/// they subscribed.
pub struct Observer {
    store: Arc<dyn EventStore>,
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<dyn Subscriber>>>,
    last_timestamp: Mutex<Option<Time>>,
}

impl Observer {
    /// Create an observer over a store. Call [`initialize`](Self::initialize)
    /// before recording.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            subscriptions: RwLock::new(HashMap::new()),
            last_timestamp: Mutex::new(None),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    // === Recording ===

    /// Build, persist, and publish a new event.
    ///
    /// A missing source means the system itself. Returns the envelope as
    /// stored.
    pub async fn record(
        &self,
        event_type: EventType,
        correlation_id: &str,
        payload: Payload,
        source: Option<EventSource>,
        causation_id: Option<EventId>,
    ) -> Result<EventEnvelope> {
        let mut event = EventEnvelope::new(event_type, correlation_id, payload)
            .with_source(source.unwrap_or_default());
        event.causation_id = causation_id;
        event.validate()?;

        event.timestamp = self.next_timestamp().await;
        self.publish(&event).await?;
        Ok(event)
    }

    /// Persist and publish an envelope built elsewhere, unchanged.
    ///
    /// Used for replay and for ingesting facts from external producers.
    pub async fn record_raw(&self, event: &EventEnvelope) -> Result<()> {
        event.validate()?;
        self.publish(event).await
    }

    /// Current time, never earlier than the previous `record` on this observer.
    async fn next_timestamp(&self) -> Time {
        let mut last = self.last_timestamp.lock().await;
        let now = chrono::Utc::now();
        let timestamp = match *last {
            Some(previous) if previous > now => previous,
            _ => now,
        };
        *last = Some(timestamp);
        timestamp
    }

    async fn publish(&self, event: &EventEnvelope) -> Result<()> {
        self.store.append(event).await?;
        debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            correlation_id = %event.correlation_id,
            "recorded event"
        );
        self.notify(event).await;
        Ok(())
    }

    /// Deliver to every current subscriber concurrently. A failing or
    /// panicking subscriber is logged and does not affect the others.
    async fn notify(&self, event: &EventEnvelope) {
        let subscribers: Vec<(SubscriptionId, Arc<dyn Subscriber>)> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .iter()
                .map(|(id, subscriber)| (id.clone(), Arc::clone(subscriber)))
                .collect()
        };
        if subscribers.is_empty() {
            return;
        }

        let deliveries = subscribers.iter().map(|(id, subscriber)| async move {
            match AssertUnwindSafe(subscriber.on_event(event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(subscription_id = %id, event_id = %event.event_id, error = %e, "subscriber failed");
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(subscription_id = %id, event_id = %event.event_id, reason = %reason, "subscriber panicked");
                }
            }
        });
        join_all(deliveries).await;
    }

    // === Queries ===

    /// Events of one correlation id, oldest first.
    pub async fn get_events(&self, correlation_id: &str) -> Result<Vec<EventEnvelope>> {
        Ok(self.store.query(correlation_id).await?)
    }

    /// Events of one kind, oldest first.
    pub async fn get_events_by_type(&self, event_type: EventType) -> Result<Vec<EventEnvelope>> {
        Ok(self.store.query_by_type(event_type).await?)
    }

    /// Events at or after `since`, oldest first.
    pub async fn get_events_since(&self, since: Time) -> Result<Vec<EventEnvelope>> {
        Ok(self.store.query_since(since).await?)
    }

    /// Every event, oldest first.
    pub async fn get_all_events(&self) -> Result<Vec<EventEnvelope>> {
        Ok(self.store.get_all().await?)
    }

    /// Number of stored events.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.store.count().await?)
    }

    // === Subscriptions ===

    /// Register a subscriber for events recorded from now on.
    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.subscriptions
            .write()
            .await
            .insert(id.clone(), subscriber);
        debug!(subscription_id = %id, "subscribed");
        id
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let removed = self.subscriptions.write().await.remove(id).is_some();
        if removed {
            debug!(subscription_id = %id, "unsubscribed");
        }
        removed
    }

    /// Number of registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    // === Lifecycle ===

    /// Initialize the underlying store.
    pub async fn initialize(&self) -> Result<()> {
        Ok(self.store.initialize().await?)
    }

    /// Drop every subscription, then close the store.
    pub async fn close(&self) -> Result<()> {
        self.subscriptions.write().await.clear();
        Ok(self.store.close().await?)
    }

    /// Run `f` against an initialized observer and close it afterwards,
    /// whether `f` succeeded or not. The closure's result wins over a
    /// failure to close.
    pub async fn scoped<F, Fut, T, E>(store: Arc<dyn EventStore>, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Arc<Observer>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<ObserverError>,
    {
        let observer = Arc::new(Observer::new(store));
        observer.initialize().await?;

        let outcome = f(Arc::clone(&observer)).await;
        let closed = observer.close().await;

        match outcome {
            Ok(value) => {
                closed?;
                Ok(value)
            }
            Err(e) => {
                if let Err(close_error) = closed {
                    warn!(error = %close_error, "failed to close observer after error");
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::subscriber_fn;
    use chatsnapshot_core::{RuntimeType, ValidationError};
    use chatsnapshot_storage::{MemoryEventStore, StorageError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn open_observer() -> Observer {
        let observer = Observer::new(Arc::new(MemoryEventStore::new()));
        observer.initialize().await.unwrap();
        observer
    }

    fn content(text: &str) -> Payload {
        let mut payload = Payload::new();
        payload.insert("content".to_string(), json!(text));
        payload
    }

    /// Subscriber that remembers every event id it saw.
    fn collector() -> (Arc<dyn Subscriber>, Arc<Mutex<Vec<EventId>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscriber = subscriber_fn(move |event: EventEnvelope| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(event.event_id);
                Ok(())
            }
        });
        (subscriber, seen)
    }

    #[tokio::test]
    async fn test_record_appends_and_returns_envelope() {
        let observer = open_observer().await;

        let first = observer
            .record(EventType::Message, "s1", content("hi"), None, None)
            .await
            .unwrap();
        assert_eq!(observer.count().await.unwrap(), 1);

        let source = EventSource::agent(RuntimeType::Custom, "assistant");
        let second = observer
            .record(
                EventType::Message,
                "s1",
                content("hello"),
                Some(source.clone()),
                Some(first.event_id.clone()),
            )
            .await
            .unwrap();
        assert_eq!(observer.count().await.unwrap(), 2);

        assert_ne!(first.event_id, second.event_id);
        assert_eq!(first.source, EventSource::system());
        assert_eq!(second.source, source);
        assert_eq!(second.causation_id, Some(first.event_id.clone()));
        assert!(second.timestamp >= first.timestamp);

        let stored = observer.get_events("s1").await.unwrap();
        assert_eq!(stored, vec![first, second]);
    }

    #[tokio::test]
    async fn test_record_rejects_blank_correlation_id() {
        let observer = open_observer().await;

        for blank in ["", "   "] {
            let err = observer
                .record(EventType::Message, blank, content("x"), None, None)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                ObserverError::Validation(ValidationError::EmptyCorrelationId)
            ));
        }
        assert_eq!(observer.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_each_subscriber_notified_once() {
        let observer = open_observer().await;
        let (first, first_seen) = collector();
        let (second, second_seen) = collector();
        observer.subscribe(first).await;
        observer.subscribe(second).await;
        assert_eq!(observer.subscriber_count().await, 2);

        let event = observer
            .record(EventType::Message, "s1", content("hi"), None, None)
            .await
            .unwrap();

        assert_eq!(*first_seen.lock().await, vec![event.event_id.clone()]);
        assert_eq!(*second_seen.lock().await, vec![event.event_id]);
    }

    #[tokio::test]
    async fn test_no_replay_on_subscribe() {
        let observer = open_observer().await;
        observer
            .record(EventType::Message, "s1", content("before"), None, None)
            .await
            .unwrap();

        let (subscriber, seen) = collector();
        observer.subscribe(subscriber).await;
        assert!(seen.lock().await.is_empty());

        let after = observer
            .record(EventType::Message, "s1", content("after"), None, None)
            .await
            .unwrap();
        assert_eq!(*seen.lock().await, vec![after.event_id]);
    }

    #[tokio::test]
    async fn test_failing_subscribers_are_isolated() {
        let observer = open_observer().await;

        observer
            .subscribe(subscriber_fn(|_event: EventEnvelope| async move {
                Err::<(), _>(anyhow::anyhow!("subscriber is broken"))
            }))
            .await;
        observer
            .subscribe(subscriber_fn(|_event: EventEnvelope| async move {
                if true {
                    panic!("subscriber exploded");
                }
                Ok(())
            }))
            .await;
        let (healthy, seen) = collector();
        observer.subscribe(healthy).await;

        let event = observer
            .record(EventType::Message, "s1", content("hi"), None, None)
            .await
            .unwrap();

        assert_eq!(observer.count().await.unwrap(), 1);
        assert_eq!(*seen.lock().await, vec![event.event_id]);
    }

    #[tokio::test]
    async fn test_failed_append_notifies_nobody() {
        let observer = open_observer().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        observer
            .subscribe(subscriber_fn(move |_event: EventEnvelope| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }))
            .await;

        let event = EventEnvelope::new(EventType::Message, "s1", content("hi"));
        observer.record_raw(&event).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err = observer.record_raw(&event).await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(observer.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_raw_keeps_envelope_unchanged() {
        let observer = open_observer().await;
        let event = EventEnvelope::new(EventType::UiInput, "s1", content("typed"))
            .with_timestamp(chrono::Utc::now() - chrono::Duration::days(1));

        observer.record_raw(&event).await.unwrap();
        assert_eq!(observer.get_all_events().await.unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let observer = open_observer().await;
        let (subscriber, seen) = collector();
        let id = observer.subscribe(subscriber).await;

        assert!(observer.unsubscribe(&id).await);
        assert!(!observer.unsubscribe(&id).await);

        observer
            .record(EventType::Message, "s1", content("hi"), None, None)
            .await
            .unwrap();
        assert!(seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_drops_subscriptions_and_store() {
        let observer = open_observer().await;
        let (subscriber, _seen) = collector();
        observer.subscribe(subscriber).await;

        observer.close().await.unwrap();
        assert_eq!(observer.subscriber_count().await, 0);
        assert!(matches!(
            observer.count().await,
            Err(ObserverError::Storage(StorageError::Closed))
        ));
    }

    #[tokio::test]
    async fn test_uninitialized_store_is_reported() {
        let observer = Observer::new(Arc::new(MemoryEventStore::new()));
        let err = observer
            .record(EventType::Message, "s1", content("hi"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ObserverError::Storage(StorageError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_scoped_closes_on_success_and_failure() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());

        let recorded = Observer::scoped(Arc::clone(&store), |observer| async move {
            observer
                .record(EventType::Message, "s1", content("hi"), None, None)
                .await?;
            observer.count().await
        })
        .await
        .unwrap();
        assert_eq!(recorded, 1);
        assert!(matches!(store.count().await, Err(StorageError::Closed)));

        let other: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let failed: anyhow::Result<()> = Observer::scoped(Arc::clone(&other), |_observer| async move {
            Err::<(), _>(anyhow::anyhow!("work failed"))
        })
        .await;
        assert_eq!(failed.unwrap_err().to_string(), "work failed");
        assert!(matches!(other.count().await, Err(StorageError::Closed)));
    }

    #[tokio::test]
    async fn test_timestamps_never_go_backwards() {
        let observer = open_observer().await;
        *observer.last_timestamp.lock().await = Some(chrono::Utc::now() + chrono::Duration::hours(1));

        let first = observer
            .record(EventType::Message, "s1", content("a"), None, None)
            .await
            .unwrap();
        let second = observer
            .record(EventType::Message, "s1", content("b"), None, None)
            .await
            .unwrap();
        assert!(first.timestamp > chrono::Utc::now());
        assert!(second.timestamp >= first.timestamp);
    }

    #[tokio::test]
    async fn test_subscribers_run_concurrently() {
        let observer = open_observer().await;
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let arrived = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            let arrived = Arc::clone(&arrived);
            observer
                .subscribe(subscriber_fn(move |_event: EventEnvelope| {
                    let barrier = Arc::clone(&barrier);
                    let arrived = Arc::clone(&arrived);
                    async move {
                        // Only returns once both callbacks are in flight.
                        barrier.wait().await;
                        arrived.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }))
                .await;
        }

        let recorded = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            observer.record(EventType::Message, "s1", content("hi"), None, None),
        )
        .await
        .expect("subscribers were delivered one after another");
        recorded.unwrap();
        assert_eq!(arrived.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers() {
        let observer = Arc::new(open_observer().await);
        let (subscriber, seen) = collector();
        observer.subscribe(subscriber).await;

        let mut handles = Vec::new();
        for producer in 0..8 {
            let observer = Arc::clone(&observer);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for n in 0..10 {
                    let event = observer
                        .record(
                            EventType::Message,
                            "shared",
                            content(&format!("{producer}-{n}")),
                            None,
                            None,
                        )
                        .await
                        .unwrap();
                    ids.push(event.event_id);
                }
                ids
            }));
        }

        let mut recorded = Vec::new();
        for handle in handles {
            recorded.extend(handle.await.unwrap());
        }
        assert_eq!(recorded.len(), 80);
        assert_eq!(observer.count().await.unwrap(), 80);

        let unique: std::collections::HashSet<_> = recorded.iter().cloned().collect();
        assert_eq!(unique.len(), 80);

        let events = observer.get_events("shared").await.unwrap();
        assert_eq!(events.len(), 80);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(seen.lock().await.len(), 80);
    }
}
