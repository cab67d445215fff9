use super::errors::ModelError;
use futures::Stream;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A conversation message: plain text or an ordered list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Content as blocks; a plain string becomes one text block.
    pub fn content_blocks(&self) -> Vec<ContentBlock> {
        match &self.content {
            MessageContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            MessageContent::Blocks(blocks) => blocks.clone(),
        }
    }

    /// Get combined text content from all text blocks.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// One unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default, deserialize_with = "tool_result_parts")]
        content: Vec<ToolResultContent>,
        #[serde(default)]
        is_error: bool,
    },
    Thinking {
        #[serde(rename = "thinking")]
        text: String,
        #[serde(default)]
        signature: String,
    },
}

/// A part of a tool result as fed back to the model.
///
/// Text parts serialize as `{"type":"text","text":...}`; anything else is
/// carried verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ToolResultContent {
    Text(String),
    Structured(Value),
}

impl From<Value> for ToolResultContent {
    fn from(value: Value) -> Self {
        let text = (value.get("type").and_then(Value::as_str) == Some("text"))
            .then(|| value.get("text").and_then(Value::as_str))
            .flatten();
        match text {
            Some(text) => Self::Text(text.to_string()),
            None => Self::Structured(value),
        }
    }
}

impl From<ToolResultContent> for Value {
    fn from(content: ToolResultContent) -> Self {
        match content {
            ToolResultContent::Text(text) => serde_json::json!({"type": "text", "text": text}),
            ToolResultContent::Structured(value) => value,
        }
    }
}

/// Tool result content as a list of parts, or a bare string for one text part.
fn tool_result_parts<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<ToolResultContent>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Parts {
        Text(String),
        List(Vec<ToolResultContent>),
    }

    Ok(match Parts::deserialize(deserializer)? {
        Parts::Text(text) => vec![ToolResultContent::Text(text)],
        Parts::List(parts) => parts,
    })
}

/// Why a model turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

impl StopReason {
    /// Map an OpenAI-style `finish_reason`.
    pub fn from_finish_reason(reason: &str) -> Self {
        match reason {
            "tool_calls" => Self::ToolUse,
            "length" => Self::MaxTokens,
            _ => Self::EndTurn,
        }
    }

    /// Map an Anthropic `stop_reason`. Unknown values end the turn.
    pub fn from_anthropic(reason: &str) -> Self {
        match reason {
            "tool_use" => Self::ToolUse,
            "max_tokens" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            _ => Self::EndTurn,
        }
    }

    /// Whether the run stops here regardless of pending tool calls.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::EndTurn | Self::MaxTokens)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
        }
    }
}

/// Kind of a streamed content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    ToolUse,
    Thinking,
}

/// Kind-specific payload of a block delta.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Text(String),
    /// Fragment of the tool-argument JSON.
    ToolInput(String),
    Thinking(String),
    Signature(String),
}

/// Provider-agnostic increment of a model turn.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalEvent {
    MessageStart,
    BlockStart {
        index: usize,
        kind: BlockKind,
        id: Option<String>,
        name: Option<String>,
    },
    BlockDelta {
        index: usize,
        delta: Delta,
    },
    BlockStop {
        index: usize,
    },
    MessageDelta {
        stop_reason: Option<StopReason>,
    },
    MessageStop,
}

/// A tool definition exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Everything needed for one model turn.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
    pub system: Option<&'a str>,
}

/// Lazy, single-pass sequence of canonical events for one turn.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<CanonicalEvent, ModelError>> + Send>>;

/// Trait for model provider backends.
pub trait Backend: Send + Sync {
    fn stream_turn(
        &self,
        request: ModelRequest<'_>,
    ) -> impl Future<Output = Result<EventStream, ModelError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_text_extraction() {
        let msg = Message::blocks(Role::Assistant, vec![
            ContentBlock::Text {
                text: "Hello ".into(),
            },
            ContentBlock::ToolUse {
                id: "1".into(),
                name: "test".into(),
                input: Value::Null,
            },
            ContentBlock::Text {
                text: "world".into(),
            },
        ]);
        assert_eq!(msg.text(), "Hello world");
    }

    #[test]
    fn deserialize_client_history() {
        let messages: Vec<Message> = serde_json::from_value(json!([
            {"role": "user", "content": "add 1 and 2"},
            {"role": "assistant", "content": [
                {"type": "thinking", "thinking": "easy", "signature": "sig"},
                {"type": "tool_use", "id": "t1", "name": "srv__add", "input": {"a": 1, "b": 2}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1",
                 "content": [{"type": "text", "text": "3"}, {"type": "image", "data": "AA==", "mimeType": "image/png"}],
                 "is_error": false}
            ]}
        ]))
        .unwrap();

        assert_eq!(messages[0].content, MessageContent::Text("add 1 and 2".into()));
        let MessageContent::Blocks(blocks) = &messages[2].content else {
            panic!("expected blocks");
        };
        let ContentBlock::ToolResult { content, .. } = &blocks[0] else {
            panic!("expected tool result");
        };
        assert_eq!(content[0], ToolResultContent::Text("3".into()));
        assert!(matches!(content[1], ToolResultContent::Structured(_)));
    }

    #[test]
    fn tool_result_accepts_string_content() {
        let message: Message = serde_json::from_value(json!({
            "role": "user",
            "content": [{"type": "tool_result", "tool_use_id": "t1", "content": "3"}]
        }))
        .unwrap();
        assert_eq!(message.content_blocks(), vec![ContentBlock::ToolResult {
            tool_use_id: "t1".into(),
            content: vec![ToolResultContent::Text("3".into())],
            is_error: false,
        }]);

        let empty: ContentBlock =
            serde_json::from_value(json!({"type": "tool_result", "tool_use_id": "t2"})).unwrap();
        assert!(matches!(empty, ContentBlock::ToolResult { content, .. } if content.is_empty()));
    }

    #[test]
    fn tool_result_content_serializes_as_blocks() {
        let value = serde_json::to_value(ToolResultContent::Text("No output".into())).unwrap();
        assert_eq!(value, json!({"type": "text", "text": "No output"}));
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(StopReason::from_finish_reason("stop"), StopReason::EndTurn);
        assert_eq!(StopReason::from_finish_reason("tool_calls"), StopReason::ToolUse);
        assert_eq!(StopReason::from_finish_reason("length"), StopReason::MaxTokens);
        assert_eq!(StopReason::from_finish_reason("content_filter"), StopReason::EndTurn);
        assert!(StopReason::MaxTokens.is_terminal());
        assert!(!StopReason::StopSequence.is_terminal());
    }
}
