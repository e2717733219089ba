//! Markdown transcript. Fixed format, no configuration.

use chatsnapshot_core::{EventEnvelope, EventType};

use crate::transcript::{format_time, reason, DEFAULT_TIME_FORMAT};
use crate::{display_value, is_blank, Projection};

/// Projects events into a Markdown document.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownTranscriptProjection;

impl MarkdownTranscriptProjection {
    /// Create the projection.
    pub fn new() -> Self {
        Self
    }

    fn format_event(&self, event: &EventEnvelope) -> Option<String> {
        let agent = event.agent_name().unwrap_or("System");
        let time = format_time(&event.timestamp, DEFAULT_TIME_FORMAT);
        let payload = &event.payload;

        let block = match event.event_type {
            EventType::Message => {
                let content = payload.get("content");
                if is_blank(content) {
                    return None;
                }
                let quoted = content
                    .map(display_value)
                    .unwrap_or_default()
                    .lines()
                    .map(|line| format!("> {line}").trim_end().to_string())
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("**{agent}** ({time}):\n{quoted}")
            }
            EventType::ToolCall => {
                let tool = event.payload_str("tool_name").unwrap_or("unknown");
                let args = payload
                    .get("arguments")
                    .and_then(|a| serde_json::to_string_pretty(a).ok())
                    .unwrap_or_else(|| "{}".to_string());
                format!("**{agent}** ({time}) called `{tool}`:\n```json\n{args}\n```")
            }
            EventType::ToolResult => {
                let tool = event.payload_str("tool_name").unwrap_or("unknown");
                let result = payload.get("result").map(display_value).unwrap_or_default();
                format!("**Tool Result** (`{tool}`):\n```\n{result}\n```")
            }
            EventType::Handoff => {
                let from = event.payload_str("from_agent").unwrap_or("?");
                let to = event.payload_str("to_agent").unwrap_or("?");
                format!("*Handoff: {from} → {to}*")
            }
            EventType::WorkflowStarted => "*Workflow started*".to_string(),
            EventType::WorkflowCompleted => status_line("Workflow completed", &reason(event)),
            EventType::ExecutionCompleted => status_line("Execution completed", &reason(event)),
            _ => return None,
        };
        Some(block)
    }
}

fn status_line(label: &str, reason: &str) -> String {
    if reason.is_empty() {
        format!("*{label}*")
    } else {
        format!("*{label}: {reason}*")
    }
}

impl Projection for MarkdownTranscriptProjection {
    type Output = String;

    fn project(&self, events: &[EventEnvelope]) -> String {
        let (first, last) = match (events.first(), events.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return String::new(),
        };

        let mut lines = vec![
            format!("# Transcript: {}", first.correlation_id),
            String::new(),
            format!("**Events:** {}", events.len()),
            format!("**Start:** {}", first.timestamp.to_rfc3339()),
            format!("**End:** {}", last.timestamp.to_rfc3339()),
            String::new(),
            "---".to_string(),
            String::new(),
        ];
        for block in events.iter().filter_map(|e| self.format_event(e)) {
            lines.push(block);
            lines.push(String::new());
        }

        lines.join("\n")
    }
}
