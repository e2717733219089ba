//! Rebuilding a [`ChatSnapshot`] from events.

use std::collections::{BTreeMap, BTreeSet};

use chatsnapshot_core::{timestamp, ChatSnapshot, ChatType, EventEnvelope, EventType, Payload};
use serde_json::{json, Value};

use crate::{Projection, ProjectionError};

/// Payload keys copied into per-agent state.
const AGENT_STATE_KEYS: [&str; 2] = ["system_message", "llm_config"];

/// Projects the events of one conversation into a [`ChatSnapshot`].
///
/// The first event's correlation id becomes the chat id. More than two
/// distinct agent names make it a group chat.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotProjection;

impl SnapshotProjection {
    /// Create the projection.
    pub fn new() -> Self {
        Self
    }
}

impl Projection for SnapshotProjection {
    type Output = Result<ChatSnapshot, ProjectionError>;

    fn project(&self, events: &[EventEnvelope]) -> Self::Output {
        let (first, last) = match (events.first(), events.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(ProjectionError::EmptyInput),
        };

        let chat_type = if agents(events).len() > 2 {
            ChatType::Group
        } else {
            ChatType::Direct
        };

        let mut snapshot = ChatSnapshot::new(first.correlation_id.clone(), chat_type, last.timestamp);
        snapshot.messages = messages(events);
        snapshot.agent_states = agent_states(events);
        snapshot.context_variables = context_variables(events);
        snapshot.last_speaker = last_speaker(events);
        snapshot.round_count = events
            .iter()
            .filter(|e| e.event_type == EventType::Message)
            .count();

        if let Some(reason) = termination(events) {
            snapshot.is_terminated = true;
            snapshot.termination_reason = reason;
        }

        snapshot.metadata.insert("event_count".to_string(), json!(events.len()));
        snapshot.metadata.insert("first_event".to_string(), json!(first.event_id.as_str()));
        snapshot.metadata.insert("last_event".to_string(), json!(last.event_id.as_str()));
        snapshot.metadata.insert("start_time".to_string(), json!(timestamp::format(&first.timestamp)));
        snapshot.metadata.insert("end_time".to_string(), json!(timestamp::format(&last.timestamp)));

        Ok(snapshot)
    }
}

/// Distinct agent names from sources and from `agent_name`/`name` payload keys.
fn agents(events: &[EventEnvelope]) -> BTreeSet<&str> {
    let mut agents = BTreeSet::new();
    for event in events {
        agents.extend(event.agent_name());
        agents.extend(event.payload_str("agent_name"));
        agents.extend(event.payload_str("name"));
    }
    agents
}

fn messages(events: &[EventEnvelope]) -> Vec<Payload> {
    events
        .iter()
        .filter(|e| e.event_type.is_conversational())
        .map(|event| {
            let mut message = event.payload.clone();
            message.insert("_event_id".to_string(), json!(event.event_id.as_str()));
            message.insert("_event_type".to_string(), json!(event.event_type.as_str()));
            message.insert("_timestamp".to_string(), json!(timestamp::format(&event.timestamp)));
            if let Some(agent) = event.agent_name() {
                message
                    .entry("name")
                    .or_insert_with(|| Value::String(agent.to_string()));
            }
            message
        })
        .collect()
}

fn agent_states(events: &[EventEnvelope]) -> BTreeMap<String, Payload> {
    let mut states: BTreeMap<String, Payload> = BTreeMap::new();
    for event in events {
        let Some(agent) = event.agent_name() else {
            continue;
        };
        let state = states.entry(agent.to_string()).or_insert_with(|| {
            let mut state = Payload::new();
            state.insert("name".to_string(), json!(agent));
            state
        });
        for key in AGENT_STATE_KEYS {
            if let Some(value) = event.payload.get(key) {
                state.insert(key.to_string(), value.clone());
            }
        }
    }
    states
}

fn context_variables(events: &[EventEnvelope]) -> Payload {
    let mut variables = Payload::new();
    for event in events.iter().filter(|e| e.event_type == EventType::StateChange) {
        if let Some(Value::Object(update)) = event.payload.get("context_variables") {
            for (key, value) in update {
                variables.insert(key.clone(), value.clone());
            }
        }
    }
    variables
}

/// Reason of the most recent completion event, if there is one.
///
/// The outer `Option` says whether the chat ended, the inner one whether a
/// reason was given.
fn termination(events: &[EventEnvelope]) -> Option<Option<String>> {
    events
        .iter()
        .rev()
        .find(|e| e.event_type.is_completion())
        .map(|event| match event.payload.get("reason") {
            None | Some(Value::Null) => None,
            Some(reason) => Some(crate::display_value(reason)),
        })
}

fn last_speaker(events: &[EventEnvelope]) -> Option<String> {
    let event = events
        .iter()
        .rev()
        .find(|e| e.event_type == EventType::Message)?;
    event
        .agent_name()
        .or_else(|| event.payload_str("name"))
        .map(str::to_string)
}
