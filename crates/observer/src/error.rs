//! Observer errors.

use chatsnapshot_core::ValidationError;
use chatsnapshot_storage::StorageError;

/// Result type for observer operations.
pub type Result<T> = std::result::Result<T, ObserverError>;

/// Errors surfaced to producers and readers.
///
/// Subscriber failures never show up here; they are logged and contained.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// The fact was rejected before reaching the store
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The store failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ObserverError {
    /// Whether the store rejected a duplicate event id.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_duplicate())
    }
}
