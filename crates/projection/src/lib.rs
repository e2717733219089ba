//! Read views derived from the event log.
//!
//! A projection is a pure function from an ordered slice of events to some
//! output. It performs no I/O and never touches the observer or a store, so
//! the same input always gives the same output.

#![warn(missing_docs)]

pub mod snapshot;
pub mod transcript;
pub mod markdown;

use chatsnapshot_core::EventEnvelope;

pub use snapshot::SnapshotProjection;
pub use transcript::{TranscriptConfig, TranscriptProjection};
pub use markdown::MarkdownTranscriptProjection;

/// Derives a view from events sorted by timestamp.
pub trait Projection {
    /// What the projection produces.
    type Output;

    /// Project the events. Must not have side effects.
    fn project(&self, events: &[EventEnvelope]) -> Self::Output;
}

/// Projection failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    /// The projection needs at least one event.
    #[error("cannot project an empty event list")]
    EmptyInput,
}

/// Render a payload value for display: strings as-is, everything else as
/// compact JSON.
pub(crate) fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whether a value counts as "no content".
pub(crate) fn is_blank(value: Option<&serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::String(s)) => s.is_empty(),
        Some(serde_json::Value::Array(items)) => items.is_empty(),
        Some(serde_json::Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}
