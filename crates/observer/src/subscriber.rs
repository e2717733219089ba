//! Live event subscribers.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chatsnapshot_core::EventEnvelope;

/// Receives every event recorded after it subscribed.
///
/// Errors and panics are caught by the observer and logged; they never reach
/// the producer or other subscribers.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Handle one newly recorded event.
    async fn on_event(&self, event: &EventEnvelope) -> anyhow::Result<()>;
}

/// Subscriber backed by an async closure. See [`subscriber_fn`].
pub struct FnSubscriber<F> {
    callback: F,
}

#[async_trait]
impl<F, Fut> Subscriber for FnSubscriber<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn on_event(&self, event: &EventEnvelope) -> anyhow::Result<()> {
        (self.callback)(event.clone()).await
    }
}

/// Wrap an async closure as a subscriber.
///
/// ```ignore
/// let id = observer
///     .subscribe(subscriber_fn(|event| async move {
///         println!("{}", event.event_type);
///         Ok(())
///     }))
///     .await;
/// ```
pub fn subscriber_fn<F, Fut>(callback: F) -> Arc<dyn Subscriber>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnSubscriber { callback })
}
