//! Wire events emitted to the caller of a run.

use mcp::{CallToolResult, ToolContent};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::model::StopReason;

/// One event on the caller-facing stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    ThinkingStart,
    ThinkingDelta {
        text: String,
    },
    ThinkingEnd,
    /// Early indicator that a tool-use block opened.
    ToolStart {
        id: String,
        name: String,
    },
    TextDelta {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ToolContent>,
        is_error: bool,
    },
    UiResource(Box<UiResource>),
    Error {
        message: String,
    },
    Done {
        stop_reason: Option<StopReason>,
    },
}

impl WireEvent {
    /// Event type as written on the `event:` line.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ThinkingStart => "thinking_start",
            Self::ThinkingDelta { .. } => "thinking_delta",
            Self::ThinkingEnd => "thinking_end",
            Self::ToolStart { .. } => "tool_start",
            Self::TextDelta { .. } => "text_delta",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::UiResource(_) => "ui_resource",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    /// JSON written on the `data:` line.
    pub fn payload(&self) -> Value {
        match self {
            Self::ThinkingStart | Self::ThinkingEnd => json!({}),
            Self::ThinkingDelta { text } | Self::TextDelta { text } => json!({ "text": text }),
            Self::ToolStart { id, name } => json!({ "id": id, "name": name }),
            Self::ToolCall { id, name, input } => json!({ "id": id, "name": name, "input": input }),
            Self::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => json!({
                "tool_use_id": tool_use_id,
                "content": content,
                "isError": is_error,
            }),
            Self::UiResource(resource) => serde_json::to_value(resource).unwrap_or_default(),
            Self::Error { message } => json!({ "message": message }),
            Self::Done { stop_reason } => {
                json!({ "stop_reason": stop_reason.map(StopReason::as_str) })
            }
        }
    }
}

/// Everything a caller needs to mount a tool's UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiResource {
    /// Qualified tool name.
    pub tool_name: String,
    pub tool_use_id: String,
    pub tool_input: Value,
    pub resource_uri: String,
    pub html: String,
    pub tool_def: UiToolDef,
    pub tool_result: CallToolResult,
    /// Bridge session the rendering context must present on `initialize`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Provider-local view of the tool definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Where a run writes its wire events.
///
/// Writes after the receiving side has gone away are dropped silently.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<WireEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WireEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: WireEvent) {
        let _ = self.tx.send(event);
    }
}
