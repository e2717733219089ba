//! Event model - the canonical fact record.
//!
//! Every fact about a conversation is normalised into an [`EventEnvelope`].
//! Envelopes are append-only: once a store accepts one it is never changed or
//! removed. Runtime-specific detail lives in the open `payload` map, never in
//! new top-level fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::EventId;
use crate::{Time, ValidationError};

/// Open key/value payload owned by the producer of an event.
pub type Payload = serde_json::Map<String, Value>;

/// Canonical kinds of fact.
///
/// The set is closed. The wire value (`execution.message`, ...) is what every
/// backend persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A conversational message from an agent or user.
    #[serde(rename = "execution.message")]
    Message,
    /// An agent asked for a tool to be invoked.
    #[serde(rename = "execution.tool_call")]
    ToolCall,
    /// A tool returned a result.
    #[serde(rename = "execution.tool_result")]
    ToolResult,
    /// Agent or conversation state changed.
    #[serde(rename = "execution.state_change")]
    StateChange,
    /// Control passed from one agent to another.
    #[serde(rename = "execution.handoff")]
    Handoff,
    /// The agent run finished.
    #[serde(rename = "execution.completed")]
    ExecutionCompleted,
    /// The surrounding application started a workflow.
    #[serde(rename = "system.workflow_started")]
    WorkflowStarted,
    /// The surrounding application finished a workflow.
    #[serde(rename = "system.workflow_completed")]
    WorkflowCompleted,
    /// A task was scheduled.
    #[serde(rename = "system.task_scheduled")]
    TaskScheduled,
    /// A scheduled task finished.
    #[serde(rename = "system.task_completed")]
    TaskCompleted,
    /// Something went wrong outside the agent runtime.
    #[serde(rename = "system.error")]
    Error,
    /// A user interface delivered input.
    #[serde(rename = "ui.input_received")]
    UiInput,
    /// A user interface displayed output.
    #[serde(rename = "ui.output_displayed")]
    UiOutput,
    /// An outbound call to an external integration.
    #[serde(rename = "integration.call")]
    IntegrationCall,
    /// The response of an external integration.
    #[serde(rename = "integration.response")]
    IntegrationResponse,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [EventType; 15] = [
        Self::Message,
        Self::ToolCall,
        Self::ToolResult,
        Self::StateChange,
        Self::Handoff,
        Self::ExecutionCompleted,
        Self::WorkflowStarted,
        Self::WorkflowCompleted,
        Self::TaskScheduled,
        Self::TaskCompleted,
        Self::Error,
        Self::UiInput,
        Self::UiOutput,
        Self::IntegrationCall,
        Self::IntegrationResponse,
    ];

    /// Returns the wire value for this event type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "execution.message",
            Self::ToolCall => "execution.tool_call",
            Self::ToolResult => "execution.tool_result",
            Self::StateChange => "execution.state_change",
            Self::Handoff => "execution.handoff",
            Self::ExecutionCompleted => "execution.completed",
            Self::WorkflowStarted => "system.workflow_started",
            Self::WorkflowCompleted => "system.workflow_completed",
            Self::TaskScheduled => "system.task_scheduled",
            Self::TaskCompleted => "system.task_completed",
            Self::Error => "system.error",
            Self::UiInput => "ui.input_received",
            Self::UiOutput => "ui.output_displayed",
            Self::IntegrationCall => "integration.call",
            Self::IntegrationResponse => "integration.response",
        }
    }

    /// Message, tool-call and tool-result events: the ones that make up the
    /// visible conversation.
    pub fn is_conversational(self) -> bool {
        matches!(self, Self::Message | Self::ToolCall | Self::ToolResult)
    }

    /// Events that mark a conversation as finished.
    pub fn is_completion(self) -> bool {
        matches!(self, Self::ExecutionCompleted | Self::WorkflowCompleted)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownEventType(s.to_string()))
    }
}

/// Where a fact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    /// An agent inside a runtime.
    Agent,
    /// The application hosting the runtime.
    System,
    /// A user interface.
    Ui,
    /// An external integration.
    Integration,
}

impl EventOrigin {
    /// Returns the wire value for this origin.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::System => "system",
            Self::Ui => "ui",
            Self::Integration => "integration",
        }
    }
}

impl std::str::FromStr for EventOrigin {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(Self::Agent),
            "system" => Ok(Self::System),
            "ui" => Ok(Self::Ui),
            "integration" => Ok(Self::Integration),
            _ => Err(ValidationError::UnknownOrigin(s.to_string())),
        }
    }
}

/// The agent runtime that produced a fact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeType {
    /// AG2 / AutoGen.
    Ag2,
    /// LangGraph.
    Langgraph,
    /// CrewAI.
    Crewai,
    /// Any other runtime.
    Custom,
    /// Not produced by an agent runtime.
    #[default]
    None,
}

impl RuntimeType {
    /// Returns the wire value for this runtime.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ag2 => "ag2",
            Self::Langgraph => "langgraph",
            Self::Crewai => "crewai",
            Self::Custom => "custom",
            Self::None => "none",
        }
    }
}

impl std::str::FromStr for RuntimeType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ag2" => Ok(Self::Ag2),
            "langgraph" => Ok(Self::Langgraph),
            "crewai" => Ok(Self::Crewai),
            "custom" => Ok(Self::Custom),
            "none" => Ok(Self::None),
            _ => Err(ValidationError::UnknownRuntime(s.to_string())),
        }
    }
}

/// Provenance of a fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSource {
    /// Where it came from
    pub origin: EventOrigin,

    /// Which runtime produced it
    #[serde(default)]
    pub runtime: RuntimeType,

    /// The agent that produced it, if any
    #[serde(default)]
    pub agent_name: Option<String>,
}

impl EventSource {
    /// Source for facts emitted by the hosting application.
    pub fn system() -> Self {
        Self {
            origin: EventOrigin::System,
            runtime: RuntimeType::None,
            agent_name: None,
        }
    }

    /// Source for facts emitted by a named agent.
    pub fn agent(runtime: RuntimeType, agent_name: impl Into<String>) -> Self {
        Self {
            origin: EventOrigin::Agent,
            runtime,
            agent_name: Some(agent_name.into()),
        }
    }
}

impl Default for EventSource {
    fn default() -> Self {
        Self::system()
    }
}

/// The unit of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier, never reused
    pub event_id: EventId,

    /// What kind of fact this is
    pub event_type: EventType,

    /// When it was created
    #[serde(with = "crate::timestamp")]
    pub timestamp: Time,

    /// Who produced it
    pub source: EventSource,

    /// Session or run this fact belongs to
    pub correlation_id: String,

    /// Producer-owned detail
    #[serde(default)]
    pub payload: Payload,

    /// The event that caused this one. Lookup only; may dangle.
    #[serde(default)]
    pub causation_id: Option<EventId>,
}

impl EventEnvelope {
    /// Create a new envelope with a fresh id, the current time, and a system
    /// source.
    pub fn new(event_type: EventType, correlation_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            event_id: EventId::new(),
            event_type,
            timestamp: chrono::Utc::now(),
            source: EventSource::system(),
            correlation_id: correlation_id.into(),
            payload,
            causation_id: None,
        }
    }

    /// Replace the source.
    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = source;
        self
    }

    /// Link this envelope to the event that caused it.
    pub fn with_causation(mut self, causation_id: EventId) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    /// Override the creation time.
    pub fn with_timestamp(mut self, timestamp: Time) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Check the invariants a store relies on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_correlation_id(&self.correlation_id)
    }

    /// The agent named in the source, if any.
    pub fn agent_name(&self) -> Option<&str> {
        self.source.agent_name.as_deref()
    }

    /// A payload field, if present and a string.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Serialise as a single JSON Lines record (no trailing newline).
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a single JSON Lines record.
    pub fn from_json_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// Reject empty or blank correlation ids.
pub(crate) fn validate_correlation_id(correlation_id: &str) -> Result<(), ValidationError> {
    if correlation_id.trim().is_empty() {
        return Err(ValidationError::EmptyCorrelationId);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => Payload::new(),
        }
    }

    #[test]
    fn test_new_envelope_defaults() {
        let event = EventEnvelope::new(
            EventType::Message,
            "test_001",
            payload(json!({"content": "Hello"})),
        );

        assert_eq!(event.event_type, EventType::Message);
        assert_eq!(event.correlation_id, "test_001");
        assert_eq!(event.source, EventSource::system());
        assert_eq!(event.payload_str("content"), Some("Hello"));
        assert!(event.causation_id.is_none());
    }

    #[test]
    fn test_event_serialization_round_trip() {
        let parent = EventEnvelope::new(EventType::ToolCall, "s1", Payload::new());
        let event = EventEnvelope::new(
            EventType::ToolResult,
            "s1",
            payload(json!({"result": {"rows": [1, 2, 3]}, "tool_name": "sql"})),
        )
        .with_source(EventSource::agent(RuntimeType::Ag2, "Analyst"))
        .with_causation(parent.event_id.clone());

        let line = event.to_json_line().unwrap();
        let restored = EventEnvelope::from_json_line(&line).unwrap();

        assert_eq!(restored, event);
    }

    #[test]
    fn test_wire_shape_is_flat() {
        let event = EventEnvelope::new(EventType::Handoff, "s1", Payload::new());
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["event_type"], "execution.handoff");
        assert_eq!(value["source"]["origin"], "system");
        assert_eq!(value["source"]["runtime"], "none");
        assert!(value["source"]["agent_name"].is_null());
        assert!(value["causation_id"].is_null());
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_reads_records_from_other_producers() {
        let line = r#"{"event_id":"9b2f6a6e-0000-4000-8000-000000000001","event_type":"execution.message","timestamp":"2025-03-01T12:00:00.123456","source":{"origin":"agent","agent_name":"A"},"correlation_id":"s1","payload":{"content":"hi"}}"#;
        let event = EventEnvelope::from_json_line(line).unwrap();

        assert_eq!(event.source.runtime, RuntimeType::None);
        assert_eq!(event.agent_name(), Some("A"));
        assert!(event.causation_id.is_none());
    }

    #[test]
    fn test_event_type_wire_values() {
        for kind in EventType::ALL {
            assert_eq!(kind.as_str().parse::<EventType>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }

        assert_eq!(
            "execution.unknown".parse::<EventType>(),
            Err(ValidationError::UnknownEventType("execution.unknown".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_blank_correlation_id() {
        let event = EventEnvelope::new(EventType::Message, "  ", Payload::new());
        assert_eq!(event.validate(), Err(ValidationError::EmptyCorrelationId));
    }

    #[test]
    fn test_origin_and_runtime_parse() {
        assert_eq!("ui".parse::<EventOrigin>().unwrap(), EventOrigin::Ui);
        assert_eq!("crewai".parse::<RuntimeType>().unwrap(), RuntimeType::Crewai);
        assert!("robot".parse::<EventOrigin>().is_err());
        assert!("autogen".parse::<RuntimeType>().is_err());
    }
}
