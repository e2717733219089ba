//! Plain-text transcript.

use std::fmt::Write as _;

use chatsnapshot_core::{EventEnvelope, EventType, Time};

use crate::{display_value, is_blank, Projection};

/// Tool results longer than this many characters are cut.
pub const MAX_RESULT_CHARS: usize = 200;

/// Default strftime format for per-line timestamps.
pub const DEFAULT_TIME_FORMAT: &str = "%H:%M:%S";

/// What the transcript shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptConfig {
    /// Prefix each line with `[<time>] `
    pub include_timestamps: bool,
    /// Render tool calls and results
    pub include_tool_calls: bool,
    /// Render otherwise hidden events as `[<type>] <payload>`
    pub include_metadata: bool,
    /// strftime format for the line prefix
    pub timestamp_format: String,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            include_timestamps: true,
            include_tool_calls: true,
            include_metadata: false,
            timestamp_format: DEFAULT_TIME_FORMAT.to_string(),
        }
    }
}

/// Projects events into a human-readable transcript, one line per event
/// shown. An empty input gives an empty string.
#[derive(Debug, Clone, Default)]
pub struct TranscriptProjection {
    config: TranscriptConfig,
}

impl TranscriptProjection {
    /// Projection with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Projection with a custom configuration.
    pub fn with_config(config: TranscriptConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &TranscriptConfig {
        &self.config
    }

    fn format_event(&self, event: &EventEnvelope) -> Option<String> {
        let prefix = if self.config.include_timestamps {
            format!("[{}] ", format_time(&event.timestamp, &self.config.timestamp_format))
        } else {
            String::new()
        };
        let agent = event.agent_name().unwrap_or("System");
        let payload = &event.payload;
        let tools = self.config.include_tool_calls;

        let line = match event.event_type {
            EventType::Message => {
                let content = payload.get("content");
                if is_blank(content) {
                    return None;
                }
                format!("{prefix}{agent}: {}", content.map(display_value).unwrap_or_default())
            }
            EventType::ToolCall if tools => {
                let tool = event.payload_str("tool_name").unwrap_or("unknown");
                let args = payload
                    .get("arguments")
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "{}".to_string());
                format!("{prefix}{agent} -> [TOOL: {tool}] {args}")
            }
            EventType::ToolResult if tools => {
                let tool = event.payload_str("tool_name").unwrap_or("unknown");
                let result = payload.get("result").map(display_value).unwrap_or_default();
                format!("{prefix}[TOOL RESULT: {tool}] {}", truncate(&result))
            }
            EventType::Handoff => {
                let from = event.payload_str("from_agent").unwrap_or("?");
                let to = event.payload_str("to_agent").unwrap_or("?");
                format!("{prefix}[HANDOFF] {from} -> {to}")
            }
            EventType::WorkflowStarted => format!("{prefix}[WORKFLOW STARTED]"),
            EventType::WorkflowCompleted => {
                format!("{prefix}[WORKFLOW COMPLETED] {}", reason(event))
            }
            EventType::ExecutionCompleted => {
                format!("{prefix}[EXECUTION COMPLETED] {}", reason(event))
            }
            _ if self.config.include_metadata => {
                format!(
                    "{prefix}[{}] {}",
                    event.event_type,
                    serde_json::Value::Object(payload.clone())
                )
            }
            _ => return None,
        };

        Some(line.trim_end().to_string())
    }
}

impl Projection for TranscriptProjection {
    type Output = String;

    fn project(&self, events: &[EventEnvelope]) -> String {
        let (first, last) = match (events.first(), events.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return String::new(),
        };

        let mut lines = vec![
            format!("=== Transcript: {} ===", first.correlation_id),
            format!("Events: {}", events.len()),
            format!("Start: {}", first.timestamp.to_rfc3339()),
            format!("End: {}", last.timestamp.to_rfc3339()),
            String::new(),
        ];
        lines.extend(events.iter().filter_map(|e| self.format_event(e)));
        lines.push(String::new());
        lines.push("=== End Transcript ===".to_string());

        lines.join("\n")
    }
}

/// Render with a strftime format, falling back to the default when the
/// format is invalid.
pub(crate) fn format_time(ts: &Time, fmt: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", ts.format(fmt)).is_err() {
        out.clear();
        let _ = write!(out, "{}", ts.format(DEFAULT_TIME_FORMAT));
    }
    out
}

pub(crate) fn reason(event: &EventEnvelope) -> String {
    event
        .payload
        .get("reason")
        .filter(|r| !r.is_null())
        .map(display_value)
        .unwrap_or_default()
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_RESULT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
