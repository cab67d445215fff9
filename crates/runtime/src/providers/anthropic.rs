//! Anthropic Messages API backend (streaming).

use std::collections::HashSet;

use super::sse::SseEvent;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use super::{Translate, api_error, normalize};
use crate::model::{
    Backend, BlockKind, CanonicalEvent, ContentBlock, Delta, EventStream, Message,
    MessageContent, ModelError, ModelRequest, Role, StopReason, ToolResultContent, ToolSpec,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
/// Sent in the request body on Vertex AI, which takes no `anthropic-version` header.
const VERTEX_API_VERSION: &str = "vertex-2023-10-16";

/// Authentication mode for Anthropic API.
#[derive(Debug, Clone)]
pub enum AnthropicAuth {
    /// Standard API key authentication.
    ApiKey(String),
    /// Bearer token, for gateways that front the Messages API.
    Bearer(String),
}

impl std::fmt::Display for AnthropicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => write!(f, "api_key"),
            Self::Bearer(_) => write!(f, "bearer"),
        }
    }
}

impl AnthropicAuth {
    fn apply_headers(&self, req: RequestBuilder) -> RequestBuilder {
        match self {
            Self::ApiKey(key) => req.header("x-api-key", key),
            Self::Bearer(token) => req.header("Authorization", format!("Bearer {token}")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    /// Vertex AI names the model in the URL instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    anthropic_version: Option<&'static str>,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ApiThinking>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiThinking {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: ApiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Blocks(Vec<ApiContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
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
        content: Vec<Value>,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    Thinking {
        thinking: String,
        signature: String,
    },
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiStreamEvent {
    MessageStart,
    ContentBlockStart {
        index: usize,
        content_block: ApiStartBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: ApiDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: ApiMessageDelta,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiErrorBody,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiStartBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ApiMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream translation
// ─────────────────────────────────────────────────────────────────────────────

/// Segmented events map almost one to one. Blocks of kinds the runtime does
/// not model are dropped along with their deltas.
#[derive(Debug, Default)]
struct AnthropicTranslator {
    skipped: HashSet<usize>,
}

impl Translate for AnthropicTranslator {
    fn translate(&mut self, event: SseEvent) -> Result<Vec<CanonicalEvent>, ModelError> {
        let parsed: ApiStreamEvent = serde_json::from_str(&event.data)
            .map_err(|e| ModelError::InvalidResponse(format!("{e}: {}", event.data)))?;

        let events = match parsed {
            ApiStreamEvent::MessageStart => vec![CanonicalEvent::MessageStart],
            ApiStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ApiStartBlock::Text { text } => {
                    let mut events = vec![CanonicalEvent::BlockStart {
                        index,
                        kind: BlockKind::Text,
                        id: None,
                        name: None,
                    }];
                    if !text.is_empty() {
                        events.push(CanonicalEvent::BlockDelta {
                            index,
                            delta: Delta::Text(text),
                        });
                    }
                    events
                }
                ApiStartBlock::ToolUse { id, name } => vec![CanonicalEvent::BlockStart {
                    index,
                    kind: BlockKind::ToolUse,
                    id: Some(id),
                    name: Some(name),
                }],
                ApiStartBlock::Thinking { thinking } => {
                    let mut events = vec![CanonicalEvent::BlockStart {
                        index,
                        kind: BlockKind::Thinking,
                        id: None,
                        name: None,
                    }];
                    if !thinking.is_empty() {
                        events.push(CanonicalEvent::BlockDelta {
                            index,
                            delta: Delta::Thinking(thinking),
                        });
                    }
                    events
                }
                ApiStartBlock::Unknown => {
                    trace!(index, "skipping unsupported content block");
                    self.skipped.insert(index);
                    Vec::new()
                }
            },
            ApiStreamEvent::ContentBlockDelta { index, delta } => {
                if self.skipped.contains(&index) {
                    return Ok(Vec::new());
                }
                let delta = match delta {
                    ApiDelta::TextDelta { text } => Delta::Text(text),
                    ApiDelta::InputJsonDelta { partial_json } => Delta::ToolInput(partial_json),
                    ApiDelta::ThinkingDelta { thinking } => Delta::Thinking(thinking),
                    ApiDelta::SignatureDelta { signature } => Delta::Signature(signature),
                    ApiDelta::Unknown => return Ok(Vec::new()),
                };
                vec![CanonicalEvent::BlockDelta { index, delta }]
            }
            ApiStreamEvent::ContentBlockStop { index } => {
                if self.skipped.remove(&index) {
                    Vec::new()
                } else {
                    vec![CanonicalEvent::BlockStop { index }]
                }
            }
            ApiStreamEvent::MessageDelta { delta } => vec![CanonicalEvent::MessageDelta {
                stop_reason: delta.stop_reason.as_deref().map(StopReason::from_anthropic),
            }],
            ApiStreamEvent::MessageStop => vec![CanonicalEvent::MessageStop],
            ApiStreamEvent::Ping | ApiStreamEvent::Unknown => Vec::new(),
            ApiStreamEvent::Error { error } => return Err(ModelError::Api(error.message)),
        };
        Ok(events)
    }

    fn finish(&mut self) -> Vec<CanonicalEvent> {
        Vec::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Google Cloud project and region serving Claude through Vertex AI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexTarget {
    pub project: String,
    pub region: String,
}

impl VertexTarget {
    fn base_url(&self) -> String {
        match self.region.as_str() {
            "global" => "https://aiplatform.googleapis.com".to_string(),
            region => format!("https://{region}-aiplatform.googleapis.com"),
        }
    }
}

/// Builder for creating an Anthropic backend.
#[derive(Debug, Clone)]
pub struct AnthropicBackendBuilder {
    auth: AnthropicAuth,
    model: String,
    max_tokens: u32,
    base_url: Option<String>,
    thinking_budget: Option<u32>,
    vertex: Option<VertexTarget>,
}

impl AnthropicBackendBuilder {
    pub fn new(auth: AnthropicAuth, model: impl Into<String>) -> Self {
        Self {
            auth,
            model: model.into(),
            max_tokens: 16384,
            base_url: None,
            thinking_budget: None,
            vertex: None,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Serve through Vertex AI's `streamRawPredict`. Pair with
    /// [`AnthropicAuth::Bearer`] carrying a Google access token.
    pub fn vertex(mut self, project: impl Into<String>, region: impl Into<String>) -> Self {
        self.vertex = Some(VertexTarget {
            project: project.into(),
            region: region.into(),
        });
        self
    }

    /// Enable extended thinking with the given token budget.
    pub fn thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }

    pub fn build(self) -> AnthropicBackend {
        let endpoint = match &self.vertex {
            Some(target) => {
                let base = self.base_url.unwrap_or_else(|| target.base_url());
                format!(
                    "{}/v1/projects/{}/locations/{}/publishers/anthropic/models/{}:streamRawPredict",
                    base.trim_end_matches('/'),
                    target.project,
                    target.region,
                    self.model
                )
            }
            None => {
                let base = self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
                format!("{}/v1/messages", base.trim_end_matches('/'))
            }
        };
        AnthropicBackend {
            client: reqwest::Client::new(),
            auth: self.auth,
            model: self.model,
            max_tokens: self.max_tokens,
            endpoint,
            thinking_budget: self.thinking_budget,
            vertex: self.vertex,
        }
    }
}

/// Anthropic API backend.
pub struct AnthropicBackend {
    client: reqwest::Client,
    auth: AnthropicAuth,
    model: String,
    max_tokens: u32,
    endpoint: String,
    thinking_budget: Option<u32>,
    vertex: Option<VertexTarget>,
}

impl AnthropicBackend {
    pub fn builder(auth: AnthropicAuth, model: impl Into<String>) -> AnthropicBackendBuilder {
        AnthropicBackendBuilder::new(auth, model)
    }

    fn role_to_api(role: Role) -> &'static str {
        match role {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn message_to_api(&self, msg: &Message) -> ApiMessage {
        let role = Self::role_to_api(msg.role);

        let blocks = match &msg.content {
            MessageContent::Text(text) => {
                return ApiMessage {
                    role,
                    content: ApiContent::Text(text.clone()),
                };
            }
            MessageContent::Blocks(blocks) => blocks,
        };

        let blocks = blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(ApiContentBlock::Text { text: text.clone() }),
                ContentBlock::ToolUse { id, name, input } => Some(ApiContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => Some(ApiContentBlock::ToolResult {
                    tool_use_id: tool_use_id.clone(),
                    content: content.iter().map(result_part_to_api).collect(),
                    is_error: *is_error,
                }),
                // Replayed thinking is only accepted while thinking is enabled.
                ContentBlock::Thinking { text, signature } => {
                    self.thinking_budget.map(|_| ApiContentBlock::Thinking {
                        thinking: text.clone(),
                        signature: signature.clone(),
                    })
                }
            })
            .collect();

        ApiMessage {
            role,
            content: ApiContent::Blocks(blocks),
        }
    }

    fn api_request<'a>(&'a self, request: &ModelRequest<'a>) -> ApiRequest<'a> {
        let vertex = self.vertex.is_some();
        ApiRequest {
            model: (!vertex).then_some(self.model.as_str()),
            anthropic_version: vertex.then_some(VERTEX_API_VERSION),
            max_tokens: self.max_tokens,
            messages: request
                .messages
                .iter()
                .map(|m| self.message_to_api(m))
                .collect(),
            system: request.system.filter(|s| !s.is_empty()),
            tools: request.tools.iter().map(Self::tool_to_api).collect(),
            thinking: self.thinking_budget.map(|budget_tokens| ApiThinking {
                kind: "enabled",
                budget_tokens,
            }),
            stream: true,
        }
    }

    fn tool_to_api(spec: &ToolSpec) -> ApiTool<'_> {
        ApiTool {
            name: &spec.name,
            description: &spec.description,
            input_schema: &spec.input_schema,
        }
    }
}

/// Tool-result parts: text as-is, MCP images as base64 image blocks,
/// anything else as its JSON text.
fn result_part_to_api(part: &ToolResultContent) -> Value {
    match part {
        ToolResultContent::Text(text) => serde_json::json!({"type": "text", "text": text}),
        ToolResultContent::Structured(value) => {
            let image = (value.get("type").and_then(Value::as_str) == Some("image"))
                .then(|| {
                    let data = value.get("data")?.as_str()?;
                    let media_type = value.get("mimeType")?.as_str()?;
                    Some(serde_json::json!({
                        "type": "image",
                        "source": {"type": "base64", "media_type": media_type, "data": data},
                    }))
                })
                .flatten();
            image.unwrap_or_else(|| serde_json::json!({"type": "text", "text": value.to_string()}))
        }
    }
}

impl std::fmt::Display for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.vertex {
            Some(target) => write!(f, "vertex({}, region={})", self.model, target.region),
            None => write!(f, "anthropic({}, auth={})", self.model, self.auth),
        }
    }
}

impl Backend for AnthropicBackend {
    async fn stream_turn(&self, request: ModelRequest<'_>) -> Result<EventStream, ModelError> {
        let api_request = self.api_request(&request);

        let mut req = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .header("accept", "text/event-stream");
        if self.vertex.is_none() {
            req = req.header("anthropic-version", API_VERSION);
        }

        let response = self
            .auth
            .apply_headers(req)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        Ok(normalize(response, AnthropicTranslator::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sse(data: Value) -> SseEvent {
        SseEvent {
            event: data["type"].as_str().map(String::from),
            data: data.to_string(),
        }
    }

    fn translate_all(events: Vec<Value>) -> Vec<CanonicalEvent> {
        let mut translator = AnthropicTranslator::default();
        events
            .into_iter()
            .flat_map(|e| translator.translate(sse(e)).unwrap())
            .collect()
    }

    #[test]
    fn auth_display() {
        let api = AnthropicAuth::ApiKey("test".into());
        let bearer = AnthropicAuth::Bearer("test".into());
        assert_eq!(api.to_string(), "api_key");
        assert_eq!(bearer.to_string(), "bearer");
    }

    #[test]
    fn segmented_stream_passthrough() {
        let events = translate_all(vec![
            json!({"type": "message_start", "message": {"id": "msg_1"}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "hmm"}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "sig"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "t1", "name": "srv__add", "input": {}}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"a\":1}"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "ping"}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 5}}),
            json!({"type": "message_stop"}),
        ]);

        assert_eq!(events, vec![
            CanonicalEvent::MessageStart,
            CanonicalEvent::BlockStart {
                index: 0,
                kind: BlockKind::Thinking,
                id: None,
                name: None
            },
            CanonicalEvent::BlockDelta {
                index: 0,
                delta: Delta::Thinking("hmm".into())
            },
            CanonicalEvent::BlockDelta {
                index: 0,
                delta: Delta::Signature("sig".into())
            },
            CanonicalEvent::BlockStop { index: 0 },
            CanonicalEvent::BlockStart {
                index: 1,
                kind: BlockKind::ToolUse,
                id: Some("t1".into()),
                name: Some("srv__add".into())
            },
            CanonicalEvent::BlockDelta {
                index: 1,
                delta: Delta::ToolInput("{\"a\":1}".into())
            },
            CanonicalEvent::BlockStop { index: 1 },
            CanonicalEvent::MessageDelta {
                stop_reason: Some(StopReason::ToolUse)
            },
            CanonicalEvent::MessageStop,
        ]);
    }

    #[test]
    fn unsupported_blocks_are_dropped() {
        let events = translate_all(vec![
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "redacted_thinking", "data": "xx"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "text", "text": "Hi"}}),
        ]);
        assert_eq!(events, vec![
            CanonicalEvent::BlockStart {
                index: 1,
                kind: BlockKind::Text,
                id: None,
                name: None
            },
            CanonicalEvent::BlockDelta {
                index: 1,
                delta: Delta::Text("Hi".into())
            },
        ]);
    }

    #[test]
    fn error_event_fails_the_stream() {
        let mut translator = AnthropicTranslator::default();
        let err = translator
            .translate(sse(json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})))
            .unwrap_err();
        assert!(matches!(err, ModelError::Api(msg) if msg == "Overloaded"));
    }

    #[test]
    fn request_conversion() {
        let backend = AnthropicBackend::builder(AnthropicAuth::ApiKey("k".into()), "claude").build();
        let msg = Message::blocks(Role::User, vec![ContentBlock::ToolResult {
            tool_use_id: "t1".into(),
            content: vec![
                ToolResultContent::Text("3".into()),
                ToolResultContent::Structured(json!({"type": "image", "data": "AA==", "mimeType": "image/png"})),
            ],
            is_error: false,
        }]);
        let api = serde_json::to_value(backend.message_to_api(&msg)).unwrap();
        assert_eq!(api["content"][0]["type"], "tool_result");
        assert_eq!(api["content"][0]["content"][0], json!({"type": "text", "text": "3"}));
        assert_eq!(api["content"][0]["content"][1]["source"]["media_type"], "image/png");
        assert!(api["content"][0].get("is_error").is_none());

        let thinking = Message::blocks(Role::Assistant, vec![ContentBlock::Thinking {
            text: "x".into(),
            signature: "s".into(),
        }]);
        let api = serde_json::to_value(backend.message_to_api(&thinking)).unwrap();
        assert_eq!(api["content"], json!([]));
    }
    #[test]
    fn vertex_endpoint_and_body() {
        let backend = AnthropicBackend::builder(AnthropicAuth::Bearer("ya29.token".into()), "claude-opus-4-6")
            .vertex("my-project", "us-east5")
            .build();
        assert_eq!(
            backend.endpoint,
            "https://us-east5-aiplatform.googleapis.com/v1/projects/my-project/locations/us-east5/publishers/anthropic/models/claude-opus-4-6:streamRawPredict"
        );
        assert_eq!(backend.to_string(), "vertex(claude-opus-4-6, region=us-east5)");

        let messages = [Message::user("hi")];
        let body = serde_json::to_value(backend.api_request(&ModelRequest {
            messages: &messages,
            tools: &[],
            system: None,
        }))
        .unwrap();
        assert_eq!(body["anthropic_version"], "vertex-2023-10-16");
        assert!(body.get("model").is_none());
        assert_eq!(body["stream"], true);

        let global = AnthropicBackend::builder(AnthropicAuth::Bearer("t".into()), "claude")
            .vertex("p", "global")
            .build();
        assert!(global.endpoint.starts_with("https://aiplatform.googleapis.com/v1/projects/p/locations/global/"));
    }

    #[test]
    fn direct_api_names_the_model_in_the_body() {
        let backend = AnthropicBackend::builder(AnthropicAuth::ApiKey("k".into()), "claude")
            .base_url("http://localhost:8080/")
            .build();
        assert_eq!(backend.endpoint, "http://localhost:8080/v1/messages");

        let messages = [Message::user("hi")];
        let body = serde_json::to_value(backend.api_request(&ModelRequest {
            messages: &messages,
            tools: &[],
            system: Some("be brief"),
        }))
        .unwrap();
        assert_eq!(body["model"], "claude");
        assert!(body.get("anthropic_version").is_none());
        assert_eq!(body["system"], "be brief");
    }
}
