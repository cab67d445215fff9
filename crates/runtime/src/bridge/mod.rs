//! Host side of the JSON-RPC bridge to rendered tool UIs.
//!
//! Each UI resource streamed to a caller gets a [`BridgeSession`]. The
//! rendering context binds its message channel to that session by sending
//! an `initialize` request whose `params.sessionId` names it; from then on
//! every frame on the channel is handled in that session's context.
//!
//! Supported methods (bare or `ui/`-prefixed):
//!
//! - `initialize`: host info, capabilities, and tool context
//! - `notifications/initialized`: deliver tool input and result, once
//! - `tools/call`: proxied to the tool host under the session's provider
//! - `open-link`: opened only after the user confirms
//! - `notifications/size-changed`: resize the rendering context
//! - `message`: inject a user turn into the conversation

mod errors;
mod session;
mod slots;
mod surface;

pub use errors::BridgeError;
pub use session::UiMount;
pub use slots::{QueuedUserMessage, SubmitOutcome, TurnGuard, TurnSlots};
pub use surface::HostSurface;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mcp::{
    INVALID_PARAMS, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId, SERVER_ERROR,
};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use self::session::BridgeSession;
use crate::tools::{ToolHost, split_qualified};

/// Protocol version announced to rendering contexts.
pub const BRIDGE_PROTOCOL_VERSION: &str = "2026-01-26";

/// Delay before tool data is pushed after `initialize`, unless the
/// rendering context confirms readiness first.
pub const DEFAULT_DELIVERY_DELAY: Duration = Duration::from_millis(50);

/// How long a session may sit without a bound channel before it is evicted.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

pub const MAX_UI_HEIGHT: u32 = 800;

const HEIGHT_PADDING: f64 = 20.0;

pub struct UiBridge<H, S> {
    host: H,
    surface: S,
    sessions: Mutex<HashMap<String, BridgeSession>>,
    slots: Arc<TurnSlots>,
    delivery_delay: Duration,
    session_ttl: Duration,
}

impl<H, S> UiBridge<H, S>
where
    H: ToolHost + 'static,
    S: HostSurface,
{
    pub fn new(host: H, surface: S, slots: Arc<TurnSlots>) -> Self {
        Self {
            host,
            surface,
            sessions: Mutex::new(HashMap::new()),
            slots,
            delivery_delay: DEFAULT_DELIVERY_DELAY,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_delivery_delay(mut self, delay: Duration) -> Self {
        self.delivery_delay = delay;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn slots(&self) -> &Arc<TurnSlots> {
        &self.slots
    }

    /// Register a UI about to be rendered. Returns its session id.
    ///
    /// Sessions left unbound past the TTL are evicted first.
    pub async fn open_session(&self, mount: UiMount) -> String {
        let id = Uuid::new_v4().to_string();
        debug!(session = %id, tool = %mount.tool_name, uri = %mount.resource_uri, "bridge session opened");
        let mut sessions = self.sessions.lock().await;
        evict_idle(&mut sessions, self.session_ttl);
        sessions.insert(id.clone(), BridgeSession::new(mount));
        id
    }

    /// Drop every session that has had no bound channel for the TTL.
    /// Returns how many were removed.
    pub async fn evict_idle(&self) -> usize {
        evict_idle(&mut *self.sessions.lock().await, self.session_ttl)
    }

    /// Mark a session's channel as gone. The session stays rebindable until
    /// it has been idle for the TTL. A channel bound since is left alone.
    pub async fn release(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().await.get_mut(session_id) {
            session.touched = Instant::now();
            if !session.is_bound() {
                session.outbound = None;
            }
            debug!(session = %session_id, "bridge channel released");
        }
    }

    /// Bind a channel to the session named in its first frame.
    ///
    /// The frame itself is not handled here; pass it to
    /// [`handle_message`](Self::handle_message) next. A session whose
    /// previous channel has closed may be bound again, and its tool data
    /// is delivered afresh.
    pub async fn bind(
        &self,
        first: &Value,
    ) -> Result<(String, mpsc::UnboundedReceiver<Value>), BridgeError> {
        let session_id = handshake_session_id(first).ok_or(BridgeError::HandshakeRequired)?;
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| BridgeError::UnknownSession(session_id.to_string()))?;
        if session.is_bound() {
            return Err(BridgeError::AlreadyBound(session_id.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        session.outbound = Some(tx);
        session.touched = Instant::now();
        session.initialized = false;
        session.tool_data_sent = false;
        debug!(session = %session_id, "bridge channel bound");
        Ok((session_id.to_string(), rx))
    }

    /// Discard a session. Returns whether it existed.
    pub async fn close_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(session_id).is_some();
        if removed {
            debug!(session = %session_id, "bridge session closed");
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Handle one inbound frame from a bound channel.
    ///
    /// Anything that is not well-formed JSON-RPC, and any unknown method, is
    /// logged and ignored.
    pub async fn handle_message(
        self: &Arc<Self>,
        session_id: &str,
        frame: Value,
    ) -> Result<(), BridgeError> {
        if !self.sessions.lock().await.contains_key(session_id) {
            return Err(BridgeError::UnknownSession(session_id.to_string()));
        }

        let message = match JsonRpcMessage::parse(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(session = %session_id, error = %e, "ignoring non-JSON-RPC frame");
                return Ok(());
            }
        };

        match message {
            JsonRpcMessage::Request(request) => self.handle_request(session_id, request).await,
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(session_id, notification).await
            }
            JsonRpcMessage::Response(response) => {
                trace!(session = %session_id, id = %response.id, "ignoring response frame");
            }
        }
        Ok(())
    }

    async fn handle_request(self: &Arc<Self>, session_id: &str, request: JsonRpcRequest) {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        let params = params.unwrap_or(Value::Null);

        match bare_method(&method) {
            "initialize" => self.initialize(session_id, id).await,
            "tools/call" => {
                let bridge = Arc::clone(self);
                let session_id = session_id.to_string();
                tokio::spawn(async move { bridge.proxy_tool_call(&session_id, id, params).await });
            }
            "open-link" => {
                let bridge = Arc::clone(self);
                let session_id = session_id.to_string();
                tokio::spawn(async move { bridge.open_link(&session_id, id, params).await });
            }
            "message" => self.inject_message(session_id, id, &params).await,
            other => warn!(session = %session_id, method = %other, "unhandled bridge request"),
        }
    }

    async fn handle_notification(&self, session_id: &str, notification: JsonRpcNotification) {
        match bare_method(&notification.method) {
            "notifications/initialized" => self.deliver_tool_data(session_id).await,
            "notifications/size-changed" => {
                let height = notification
                    .params
                    .as_ref()
                    .and_then(|p| p.get("height"))
                    .and_then(Value::as_f64)
                    .filter(|h| *h > 0.0);
                if let Some(height) = height {
                    self.surface.resize(session_id, clamp_height(height));
                }
            }
            other => debug!(session = %session_id, method = %other, "ignoring notification"),
        }
    }

    async fn initialize(self: &Arc<Self>, session_id: &str, id: RequestId) {
        {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(session_id) else {
                return;
            };
            let result = json!({
                "protocolVersion": BRIDGE_PROTOCOL_VERSION,
                "hostInfo": {"name": "arcana", "version": env!("CARGO_PKG_VERSION")},
                "hostCapabilities": {
                    "serverTools": {"callTool": true},
                    "message": {"text": true},
                },
                "hostContext": {
                    "toolInfo": {
                        "id": session.mount.tool_use_id,
                        "tool": session.mount.tool_def,
                    },
                },
            });
            session.send(JsonRpcMessage::from(JsonRpcResponse::success(id, result)).to_value());
            session.initialized = true;
        }
        debug!(session = %session_id, "bridge session initialized");

        let bridge = Arc::clone(self);
        let session_id = session_id.to_string();
        let delay = self.delivery_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bridge.deliver_tool_data(&session_id).await;
        });
    }

    /// Push the tool's input and result, at most once per binding.
    async fn deliver_tool_data(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(session_id) else {
            return;
        };
        if session.tool_data_sent || session.outbound.is_none() {
            return;
        }
        session.tool_data_sent = true;

        let input = json!({ "arguments": session.mount.tool_input });
        let result = serde_json::to_value(&session.mount.tool_result).unwrap_or_default();
        session.send(notification("ui/notifications/tool-input", input));
        session.send(notification("ui/notifications/tool-result", result));
        debug!(session = %session_id, "tool data delivered");
    }

    async fn proxy_tool_call(&self, session_id: &str, id: RequestId, params: Value) {
        let provider = {
            let sessions = self.sessions.lock().await;
            let Some(session) = sessions.get(session_id) else {
                return;
            };
            split_qualified(&session.mount.tool_name).map(|(provider, _)| provider.to_string())
        };
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        let arguments = params
            .get("arguments")
            .filter(|a| !a.is_null())
            .cloned()
            .unwrap_or_else(|| json!({}));

        let response = match provider {
            _ if name.is_empty() => JsonRpcResponse::failure(
                id,
                JsonRpcError::new(INVALID_PARAMS, "tools/call requires params.name"),
            ),
            None => JsonRpcResponse::failure(
                id,
                JsonRpcError::new(SERVER_ERROR, "session has no tool provider"),
            ),
            Some(provider) => match self.host.call_tool(&provider, name, arguments).await {
                Ok(result) => {
                    JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
                }
                Err(e) => {
                    warn!(session = %session_id, provider = %provider, tool = %name, error = %e, "bridged tool call failed");
                    JsonRpcResponse::failure(id, JsonRpcError::new(SERVER_ERROR, e.to_string()))
                }
            },
        };
        self.send(session_id, response.into()).await;
    }

    async fn open_link(&self, session_id: &str, id: RequestId, params: Value) {
        let url = params
            .get("uri")
            .or_else(|| params.get("url"))
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty());

        match url {
            Some(url) => {
                if self.surface.confirm_open_link(session_id, url).await {
                    info!(session = %session_id, url, "opening link");
                    self.surface.open_link(session_id, url);
                } else {
                    debug!(session = %session_id, url, "link declined");
                }
            }
            None => warn!(session = %session_id, "open-link without a url"),
        }
        self.send(session_id, JsonRpcResponse::success(id, json!({})).into())
            .await;
    }

    async fn inject_message(&self, session_id: &str, id: RequestId, params: &Value) {
        let text = extract_text(params);
        let conversation_id = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(session_id)
                .and_then(|s| s.mount.conversation_id.clone())
                .unwrap_or_else(|| session_id.to_string())
        };

        self.send(
            session_id,
            JsonRpcResponse::success(id, json!({ "isError": text.is_none() })).into(),
        )
        .await;

        let Some(text) = text else {
            warn!(session = %session_id, "message without text content");
            return;
        };
        let outcome = self.slots.submit(QueuedUserMessage {
            conversation_id,
            session_id: session_id.to_string(),
            text,
        });
        debug!(session = %session_id, ?outcome, "user message from UI");
    }

    async fn send(&self, session_id: &str, message: JsonRpcMessage) {
        if let Some(session) = self.sessions.lock().await.get(session_id) {
            session.send(message.to_value());
        }
    }
}

fn evict_idle(sessions: &mut HashMap<String, BridgeSession>, ttl: Duration) -> usize {
    let before = sessions.len();
    sessions.retain(|id, session| {
        let idle = session.is_idle_for(ttl);
        if idle {
            debug!(session = %id, "evicting idle bridge session");
        }
        !idle
    });
    before - sessions.len()
}

fn bare_method(method: &str) -> &str {
    method.strip_prefix("ui/").unwrap_or(method)
}

fn handshake_session_id(frame: &Value) -> Option<&str> {
    let method = frame.get("method").and_then(Value::as_str)?;
    if bare_method(method) != "initialize" || frame.get("id").is_none_or(Value::is_null) {
        return None;
    }
    frame
        .get("params")?
        .get("sessionId")?
        .as_str()
        .filter(|id| !id.is_empty())
}

fn clamp_height(height: f64) -> u32 {
    (height + HEIGHT_PADDING).min(f64::from(MAX_UI_HEIGHT)) as u32
}

/// Text blocks of a `message` payload joined by newlines; `None` if empty.
fn extract_text(params: &Value) -> Option<String> {
    let blocks = match params.get("content")? {
        Value::Array(blocks) => blocks.iter().collect::<Vec<_>>(),
        block @ Value::Object(_) => vec![block],
        _ => return None,
    };
    let text = blocks
        .into_iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");
    (!text.trim().is_empty()).then_some(text)
}

fn notification(method: &str, params: Value) -> Value {
    JsonRpcMessage::from(JsonRpcNotification::new(method, Some(params))).to_value()
}
