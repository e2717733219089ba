//! Volatile in-process event store.
//!
//! Events live in a `Vec` in append order and are lost when the process
//! exits. Ordering is applied on read. Useful for tests and development.

use std::collections::HashSet;

use async_trait::async_trait;
use chatsnapshot_core::{EventEnvelope, EventId, EventType, Time};
use tokio::sync::RwLock;
use tracing::debug;

use super::trait_::{chronological, EventStore, Lifecycle, Result, StorageError};

#[derive(Debug, Default)]
struct MemoryLog {
    events: Vec<EventEnvelope>,
    ids: HashSet<EventId>,
}

/// In-memory event store.
#[derive(Debug)]
pub struct MemoryEventStore {
    state: RwLock<Lifecycle<MemoryLog>>,
}

impl MemoryEventStore {
    /// Create an empty, uninitialized store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Lifecycle::Pending),
        }
    }

    /// Drop every event. Test helper; not part of the append-only contract.
    /// Ids of dropped events stay taken.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.get_mut()?.events.clear();
        Ok(())
    }

    async fn select(&self, keep: impl Fn(&EventEnvelope) -> bool) -> Result<Vec<EventEnvelope>> {
        let state = self.state.read().await;
        let log = state.get()?;
        let matching = log.events.iter().filter(|e| keep(e)).cloned().collect();
        Ok(chronological(matching))
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.needs_open()? {
            *state = Lifecycle::Open(MemoryLog::default());
        }
        Ok(())
    }

    async fn append(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;
        let log = state.get_mut()?;
        if !log.ids.insert(event.event_id.clone()) {
            return Err(StorageError::DuplicateEventId(event.event_id.clone()));
        }
        log.events.push(event.clone());
        debug!(event_id = %event.event_id, event_type = %event.event_type, "event appended to memory store");
        Ok(())
    }

    async fn query(&self, correlation_id: &str) -> Result<Vec<EventEnvelope>> {
        self.select(|e| e.correlation_id == correlation_id).await
    }

    async fn query_by_type(&self, event_type: EventType) -> Result<Vec<EventEnvelope>> {
        self.select(|e| e.event_type == event_type).await
    }

    async fn query_since(&self, since: Time) -> Result<Vec<EventEnvelope>> {
        self.select(|e| e.timestamp >= since).await
    }

    async fn get_all(&self) -> Result<Vec<EventEnvelope>> {
        self.select(|_| true).await
    }

    async fn count(&self) -> Result<usize> {
        let state = self.state.read().await;
        Ok(state.get()?.events.len())
    }

    async fn close(&self) -> Result<()> {
        self.state.write().await.close();
        Ok(())
    }
}
