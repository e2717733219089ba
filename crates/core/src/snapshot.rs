//! Chat snapshot - a point-in-time view of one conversation.
//!
//! A snapshot is derived data. It is rebuilt from events on demand and is
//! never appended to an event store as if it were a fact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::Payload;
use crate::Time;

/// Shape of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    /// Two parties.
    Direct,
    /// More than two parties.
    Group,
    /// A conversation started from inside another one.
    Nested,
}

impl ChatType {
    /// Returns the wire value for this chat type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Nested => "nested",
        }
    }
}

impl std::fmt::Display for ChatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete state of a chat at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSnapshot {
    /// Conversation identity
    pub chat_id: String,

    /// Direct, group or nested
    pub chat_type: ChatType,

    /// Time of the most recent fact included
    #[serde(with = "crate::timestamp")]
    pub timestamp: Time,

    /// Messages in conversation order
    pub messages: Vec<Payload>,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: Payload,

    /// Extracted per-agent state, keyed by agent name
    #[serde(default)]
    pub agent_states: BTreeMap<String, Payload>,

    /// Context variables
    #[serde(default)]
    pub context_variables: Payload,

    /// Group chat speaker selection method
    #[serde(default)]
    pub speaker_selection_method: Option<String>,

    /// Group chat round limit
    #[serde(default)]
    pub max_round: Option<u32>,

    /// Group chat admin
    #[serde(default)]
    pub admin_name: Option<String>,

    /// Allowed speaker transitions
    #[serde(default)]
    pub speaker_transitions: Option<BTreeMap<String, Vec<String>>>,

    /// Who spoke last
    #[serde(default)]
    pub last_speaker: Option<String>,

    /// Number of message rounds
    #[serde(default)]
    pub round_count: usize,

    /// Why the conversation ended
    #[serde(default)]
    pub termination_reason: Option<String>,

    /// Whether the conversation ended
    #[serde(default)]
    pub is_terminated: bool,
}

impl ChatSnapshot {
    /// Create an empty snapshot.
    pub fn new(chat_id: impl Into<String>, chat_type: ChatType, timestamp: Time) -> Self {
        Self {
            chat_id: chat_id.into(),
            chat_type,
            timestamp,
            messages: Vec::new(),
            metadata: Payload::new(),
            agent_states: BTreeMap::new(),
            context_variables: Payload::new(),
            speaker_selection_method: None,
            max_round: None,
            admin_name: None,
            speaker_transitions: None,
            last_speaker: None,
            round_count: 0,
            termination_reason: None,
            is_terminated: false,
        }
    }

    /// Listing entry for this snapshot.
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            chat_id: self.chat_id.clone(),
            chat_type: self.chat_type,
            timestamp: self.timestamp,
            message_count: self.messages.len(),
            is_terminated: self.is_terminated,
        }
    }
}

/// Short description of a stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    /// Conversation identity
    pub chat_id: String,
    /// Direct, group or nested
    pub chat_type: ChatType,
    /// Snapshot time
    #[serde(with = "crate::timestamp")]
    pub timestamp: Time,
    /// Number of messages
    pub message_count: usize,
    /// Whether the conversation ended
    pub is_terminated: bool,
}
