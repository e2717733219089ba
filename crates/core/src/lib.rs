//! ChatSnapshot core data model.
//!
//! This crate defines the canonical fact record ([`EventEnvelope`]) that every
//! other part of the system appends, queries, and projects, together with the
//! derived [`ChatSnapshot`] view.

#![warn(missing_docs)]

// Core identities
mod id;

// Facts
mod event;
mod error;
pub mod timestamp;

// Derived views
mod snapshot;

// Re-exports
pub use id::{EventId, SubscriptionId};
pub use event::{EventEnvelope, EventOrigin, EventSource, EventType, Payload, RuntimeType};
pub use error::ValidationError;
pub use snapshot::{ChatSnapshot, ChatType, SnapshotSummary};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
