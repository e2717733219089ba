//! Unique identifiers for recorded facts and live subscriptions.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for an event envelope.
///
/// Ids minted here are ULIDs. Ids produced by another system (a UUID from an
/// upstream producer, say) are carried verbatim, so the inner value is a plain
/// string rather than a parsed ULID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Generate a new EventId
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque handle returned when registering a live subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Generate a new SubscriptionId
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ids_are_unique() {
        let a = EventId::new();
        let b = EventId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 26);
    }

    #[test]
    fn test_foreign_ids_are_kept_verbatim() {
        let id = EventId::from("6f1c2c1e-8c3e-4c53-9d0a-2f0d5f7a9b11");
        assert_eq!(id.to_string(), "6f1c2c1e-8c3e-4c53-9d0a-2f0d5f7a9b11");

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"6f1c2c1e-8c3e-4c53-9d0a-2f0d5f7a9b11\"");
    }
}
