//! OpenAI-compatible chat completions backend (streaming).
//!
//! Works against any server that speaks the chat completions streaming
//! protocol; point `base_url` at it.

use super::sse::SseEvent;
use serde::Serialize;
use serde_json::Value;

use super::chunks::{ChatChunk, ChunkSynthesizer};
use super::{Translate, api_error, normalize};
use crate::model::{
    Backend, CanonicalEvent, ContentBlock, EventStream, Message, MessageContent, ModelError,
    ModelRequest, Role, ToolResultContent, ToolSpec,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
    stream: bool,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
enum ApiMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ApiToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, PartialEq, Serialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: ApiFunctionCall,
}

#[derive(Debug, PartialEq, Serialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ApiFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ApiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Message conversion
// ─────────────────────────────────────────────────────────────────────────────

fn convert_messages(messages: &[Message], system: Option<&str>) -> Vec<ApiMessage> {
    let mut out = Vec::new();
    if let Some(system) = system.filter(|s| !s.is_empty()) {
        out.push(ApiMessage::System {
            content: system.to_string(),
        });
    }

    for message in messages {
        let blocks = match &message.content {
            MessageContent::Text(text) => {
                out.push(match message.role {
                    Role::User => ApiMessage::User {
                        content: text.clone(),
                    },
                    Role::Assistant => ApiMessage::Assistant {
                        content: Some(text.clone()),
                        tool_calls: Vec::new(),
                    },
                });
                continue;
            }
            MessageContent::Blocks(blocks) => blocks,
        };

        match message.role {
            Role::Assistant => out.push(convert_assistant(blocks)),
            Role::User => convert_user(blocks, &mut out),
        }
    }
    out
}

/// Text and tool calls collapse into one assistant message; thinking is dropped.
fn convert_assistant(blocks: &[ContentBlock]) -> ApiMessage {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ApiToolCall {
                id: id.clone(),
                kind: "function",
                function: ApiFunctionCall {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            ContentBlock::Thinking { .. } | ContentBlock::ToolResult { .. } => {}
        }
    }
    ApiMessage::Assistant {
        content: (!text.is_empty()).then_some(text),
        tool_calls,
    }
}

/// Tool results become `tool` messages, followed by any user text.
fn convert_user(blocks: &[ContentBlock], out: &mut Vec<ApiMessage>) {
    let mut text = String::new();
    for block in blocks {
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                let joined = content
                    .iter()
                    .map(|part| match part {
                        ToolResultContent::Text(text) => text.clone(),
                        ToolResultContent::Structured(value) => value.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                out.push(ApiMessage::Tool {
                    tool_call_id: tool_use_id.clone(),
                    content: if joined.is_empty() {
                        "No output".to_string()
                    } else {
                        joined
                    },
                });
            }
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::ToolUse { .. } | ContentBlock::Thinking { .. } => {}
        }
    }
    if !text.is_empty() {
        out.push(ApiMessage::User { content: text });
    }
}

fn tool_to_api(spec: &ToolSpec) -> ApiTool<'_> {
    ApiTool {
        kind: "function",
        function: ApiFunction {
            name: &spec.name,
            description: &spec.description,
            parameters: &spec.input_schema,
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream translation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct OpenAiTranslator {
    synthesizer: ChunkSynthesizer,
}

impl Translate for OpenAiTranslator {
    fn translate(&mut self, event: SseEvent) -> Result<Vec<CanonicalEvent>, ModelError> {
        let data = event.data.trim();
        if data == "[DONE]" {
            return Ok(self.synthesizer.finish());
        }
        let value: Value = serde_json::from_str(data)
            .map_err(|e| ModelError::InvalidResponse(format!("{e}: {data}")))?;
        if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
            return Err(ModelError::Api(message.to_string()));
        }
        let chunk: ChatChunk = serde_json::from_value(value)
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        Ok(self.synthesizer.push(chunk))
    }

    fn finish(&mut self) -> Vec<CanonicalEvent> {
        self.synthesizer.finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating an OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAiBackendBuilder {
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
}

impl OpenAiBackendBuilder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 16384,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn build(self) -> OpenAiBackend {
        OpenAiBackend {
            client: reqwest::Client::new(),
            api_key: self.api_key,
            model: self.model,
            max_tokens: self.max_tokens,
            endpoint: format!("{}/chat/completions", self.base_url.trim_end_matches('/')),
        }
    }
}

/// OpenAI-compatible chat completions backend.
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    endpoint: String,
}

impl OpenAiBackend {
    pub fn builder(api_key: impl Into<String>, model: impl Into<String>) -> OpenAiBackendBuilder {
        OpenAiBackendBuilder::new(api_key, model)
    }
}

impl std::fmt::Display for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "openai({}, {})", self.model, self.endpoint)
    }
}

impl Backend for OpenAiBackend {
    async fn stream_turn(&self, request: ModelRequest<'_>) -> Result<EventStream, ModelError> {
        let api_request = ApiRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: convert_messages(request.messages, request.system),
            tools: request.tools.iter().map(tool_to_api).collect(),
            stream: true,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("accept", "text/event-stream")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        Ok(normalize(response, OpenAiTranslator::default()))
    }
}
