//! Validation errors raised before a fact is accepted.

/// A fact was rejected before reaching any store.
///
/// These are caller mistakes and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The correlation id was missing, empty, or only whitespace.
    #[error("correlation_id must be a non-empty string")]
    EmptyCorrelationId,

    /// The event type is not one of the canonical wire values.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The origin is not one of the known origins.
    #[error("unknown event origin: {0}")]
    UnknownOrigin(String),

    /// The runtime tag is not one of the known runtimes.
    #[error("unknown runtime: {0}")]
    UnknownRuntime(String),

    /// A timestamp string could not be parsed.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
