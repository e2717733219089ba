//! Event store trait abstraction.

use async_trait::async_trait;
use chatsnapshot_core::{EventEnvelope, EventId, EventType, Time};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// The core never retries any of these; retry policy belongs to the caller.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Relational database error
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Document database error
    #[cfg(feature = "mongodb")]
    #[error("Document store error: {0}")]
    Document(#[from] mongodb::error::Error),

    /// BSON encoding error
    #[cfg(feature = "mongodb")]
    #[error("BSON error: {0}")]
    Bson(String),

    /// An event with this id was already appended
    #[error("Duplicate event id: {0}")]
    DuplicateEventId(EventId),

    /// An operation ran before `initialize`
    #[error("Store not initialized")]
    NotInitialized,

    /// An operation ran after `close`
    #[error("Store is closed")]
    Closed,

    /// A persisted record could not be decoded
    #[error("Corrupted record at {location}: {reason}")]
    Corrupted {
        /// Where the record lives (line number, row sequence, ...)
        location: String,
        /// Why it could not be decoded
        reason: String,
    },

    /// A snapshot key that cannot be stored
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The backend was not compiled in
    #[error("Unsupported backend: {0}")]
    Unsupported(String),
}

impl StorageError {
    /// Whether this error is a rejected duplicate id.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateEventId(_))
    }
}

/// Append-only event storage.
///
/// Every query returns events ordered by timestamp ascending. Events with equal
/// timestamps come back in the order they were appended.
///
/// Stores move through three states: pending until [`initialize`], open, and
/// closed after [`close`]. Appends and queries outside the open state fail with
/// [`StorageError::NotInitialized`] or [`StorageError::Closed`].
///
/// [`initialize`]: EventStore::initialize
/// [`close`]: EventStore::close
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Open connections and create schema or files. Idempotent while open.
    async fn initialize(&self) -> Result<()>;

    /// Durably persist one event.
    async fn append(&self, event: &EventEnvelope) -> Result<()>;

    /// All events of one correlation id.
    async fn query(&self, correlation_id: &str) -> Result<Vec<EventEnvelope>>;

    /// All events of one kind, across correlation ids.
    async fn query_by_type(&self, event_type: EventType) -> Result<Vec<EventEnvelope>>;

    /// All events with `timestamp >= since`.
    async fn query_since(&self, since: Time) -> Result<Vec<EventEnvelope>>;

    /// Every event in the store.
    async fn get_all(&self) -> Result<Vec<EventEnvelope>>;

    /// Number of appended events.
    async fn count(&self) -> Result<usize>;

    /// Release resources. The store is unusable afterwards.
    async fn close(&self) -> Result<()>;
}

/// Open/closed state shared by the backends.
#[derive(Debug)]
pub(crate) enum Lifecycle<T> {
    Pending,
    Open(T),
    Closed,
}

impl<T> Lifecycle<T> {
    pub(crate) fn get(&self) -> Result<&T> {
        match self {
            Self::Pending => Err(StorageError::NotInitialized),
            Self::Open(inner) => Ok(inner),
            Self::Closed => Err(StorageError::Closed),
        }
    }

    pub(crate) fn get_mut(&mut self) -> Result<&mut T> {
        match self {
            Self::Pending => Err(StorageError::NotInitialized),
            Self::Open(inner) => Ok(inner),
            Self::Closed => Err(StorageError::Closed),
        }
    }

    /// Whether `initialize` still has work to do.
    pub(crate) fn needs_open(&self) -> Result<bool> {
        match self {
            Self::Pending => Ok(true),
            Self::Open(_) => Ok(false),
            Self::Closed => Err(StorageError::Closed),
        }
    }

    /// Move to closed, handing back the open resource if there was one.
    pub(crate) fn close(&mut self) -> Option<T> {
        match std::mem::replace(self, Self::Closed) {
            Self::Open(inner) => Some(inner),
            _ => None,
        }
    }
}

/// Stable sort by timestamp; ties keep their incoming (append) order.
pub(crate) fn chronological(mut events: Vec<EventEnvelope>) -> Vec<EventEnvelope> {
    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    events
}
