//! Normalising runtime output into envelopes.
//!
//! An ingest adapter receives whatever an agent runtime emits and records it
//! through the [`Observer`]. [`MessageIngestor`] handles the chat-completion
//! shaped JSON most runtimes produce:
//!
//! | Raw input | Event type |
//! |-----------|------------|
//! | object with `tool_calls` or `function_call` | `execution.tool_call` |
//! | object with `tool_call_id`, or `role == "tool"` | `execution.tool_result` |
//! | object with `content` or `message` | `execution.message` |
//! | any other object | `execution.state_change` |
//! | string | `execution.message` with `{content}` |
//! | anything else | `execution.state_change` with `{raw}` |
//!
//! Every recorded event names the previous one as its cause.

use std::sync::Arc;

use async_trait::async_trait;
use chatsnapshot_core::{
    EventEnvelope, EventId, EventOrigin, EventSource, EventType, Payload, RuntimeType,
    ValidationError,
};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::observer::Observer;

/// Turns raw runtime output into recorded events.
#[async_trait]
pub trait IngestAdapter: Send + Sync {
    /// Normalise and record one raw event. `correlation_id` overrides the
    /// adapter's default.
    async fn ingest(&self, raw: Value, correlation_id: Option<&str>) -> Result<EventEnvelope>;
}

#[derive(Debug, Default)]
struct ChainState {
    correlation_id: Option<String>,
    last_event_id: Option<EventId>,
}

/// Generic ingest adapter for chat-completion style messages.
#[derive(Debug)]
pub struct MessageIngestor {
    observer: Arc<Observer>,
    runtime: RuntimeType,
    state: Mutex<ChainState>,
}

impl MessageIngestor {
    /// Create an adapter tagging events with `runtime`.
    pub fn new(
        observer: Arc<Observer>,
        runtime: RuntimeType,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            observer,
            runtime,
            state: Mutex::new(ChainState {
                correlation_id,
                last_event_id: None,
            }),
        }
    }

    /// The observer events are recorded through.
    pub fn observer(&self) -> &Arc<Observer> {
        &self.observer
    }

    /// Default correlation id.
    pub async fn correlation_id(&self) -> Option<String> {
        self.state.lock().await.correlation_id.clone()
    }

    /// Change the default correlation id for later events.
    pub async fn set_correlation_id(&self, correlation_id: impl Into<String>) {
        self.state.lock().await.correlation_id = Some(correlation_id.into());
    }

    /// Id of the most recently recorded event.
    pub async fn last_event_id(&self) -> Option<EventId> {
        self.state.lock().await.last_event_id.clone()
    }

    /// Record a chat message. `agent_name` is also written into the payload.
    pub async fn on_message(
        &self,
        message: Payload,
        agent_name: Option<&str>,
        correlation_id: Option<&str>,
    ) -> Result<EventEnvelope> {
        let mut payload = message;
        if let Some(name) = agent_name {
            payload.insert("agent_name".to_string(), json!(name));
        }
        self.record(EventType::Message, payload, agent_name, correlation_id)
            .await
    }

    /// Record a tool invocation.
    pub async fn on_tool_call(
        &self,
        tool_name: &str,
        arguments: Value,
        agent_name: Option<&str>,
        correlation_id: Option<&str>,
    ) -> Result<EventEnvelope> {
        let payload = object(json!({
            "tool_name": tool_name,
            "arguments": arguments,
            "agent_name": agent_name,
        }));
        self.record(EventType::ToolCall, payload, agent_name, correlation_id)
            .await
    }

    /// Record a tool result.
    pub async fn on_tool_result(
        &self,
        tool_name: &str,
        result: Value,
        agent_name: Option<&str>,
        correlation_id: Option<&str>,
    ) -> Result<EventEnvelope> {
        let payload = object(json!({
            "tool_name": tool_name,
            "result": result,
            "agent_name": agent_name,
        }));
        self.record(EventType::ToolResult, payload, agent_name, correlation_id)
            .await
    }

    /// Record control passing from one agent to another.
    pub async fn on_handoff(
        &self,
        from_agent: &str,
        to_agent: &str,
        correlation_id: Option<&str>,
    ) -> Result<EventEnvelope> {
        let payload = object(json!({
            "from_agent": from_agent,
            "to_agent": to_agent,
        }));
        self.record(EventType::Handoff, payload, Some(from_agent), correlation_id)
            .await
    }

    async fn record(
        &self,
        event_type: EventType,
        payload: Payload,
        agent_name: Option<&str>,
        correlation_id: Option<&str>,
    ) -> Result<EventEnvelope> {
        // Held across the append so the causal chain stays linear.
        let mut state = self.state.lock().await;

        let correlation_id = correlation_id
            .filter(is_usable)
            .or(state.correlation_id.as_deref().filter(is_usable))
            .ok_or(ValidationError::EmptyCorrelationId)?
            .to_string();
        let source = EventSource {
            origin: EventOrigin::Agent,
            runtime: self.runtime,
            agent_name: agent_name.map(str::to_string),
        };

        let event = self
            .observer
            .record(
                event_type,
                &correlation_id,
                payload,
                Some(source),
                state.last_event_id.clone(),
            )
            .await?;

        state.last_event_id = Some(event.event_id.clone());
        Ok(event)
    }
}

#[async_trait]
impl IngestAdapter for MessageIngestor {
    async fn ingest(&self, raw: Value, correlation_id: Option<&str>) -> Result<EventEnvelope> {
        let (event_type, payload, agent_name) = normalize(raw);
        self.record(event_type, payload, agent_name.as_deref(), correlation_id)
            .await
    }
}

/// Classify a raw value and pick out the agent name.
fn normalize(raw: Value) -> (EventType, Payload, Option<String>) {
    match raw {
        Value::Object(map) => {
            let agent_name = ["name", "agent_name"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .filter(|name| !name.is_empty())
                .map(str::to_string);

            let event_type = if map.contains_key("tool_calls") || map.contains_key("function_call") {
                EventType::ToolCall
            } else if map.contains_key("tool_call_id")
                || map.get("role").and_then(Value::as_str) == Some("tool")
            {
                EventType::ToolResult
            } else if map.contains_key("content") || map.contains_key("message") {
                EventType::Message
            } else {
                EventType::StateChange
            };
            (event_type, map, agent_name)
        }
        Value::String(content) => (EventType::Message, object(json!({ "content": content })), None),
        other => (
            EventType::StateChange,
            object(json!({ "raw": other.to_string() })),
            None,
        ),
    }
}

fn is_usable(correlation_id: &&str) -> bool {
    !correlation_id.trim().is_empty()
}

fn object(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}
