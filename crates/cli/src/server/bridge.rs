//! WebSocket channel between a rendered tool UI and its bridge session.
//!
//! The page relays the UI's JSON-RPC frames over this socket. The first
//! frame is the UI's `initialize` request, whose `params.sessionId` binds
//! the socket to the session announced in the `ui_resource` event.
//!
//! Besides JSON-RPC, the server sends host-control frames tagged with a
//! `host` field (`resize`, `open-link`, `confirm-open-link`,
//! `user-message`) and the page answers link confirmations with
//! `{"host": "confirm-result", "id", "confirmed"}`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Json;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use runtime::HostSurface;
use runtime::bridge::QueuedUserMessage;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::AppState;
use crate::error::ApiError;

/// How long the page has to answer a link confirmation.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

/// [`HostSurface`] that reaches the page over each session's socket.
#[derive(Clone)]
pub struct WsSurface {
    inner: Arc<SurfaceInner>,
}

struct SurfaceInner {
    channels: Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<bool>>>,
    next_id: AtomicU64,
    confirm_timeout: Duration,
}

impl WsSurface {
    pub fn new() -> Self {
        Self::with_confirm_timeout(CONFIRM_TIMEOUT)
    }

    pub fn with_confirm_timeout(confirm_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                channels: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                confirm_timeout,
            }),
        }
    }

    fn attach(&self, session_id: &str, tx: mpsc::UnboundedSender<Value>) {
        self.channels().insert(session_id.to_string(), tx);
    }

    fn detach(&self, session_id: &str) {
        self.channels().remove(session_id);
    }

    /// Send a host frame. Returns false when the session has no open socket.
    fn send(&self, session_id: &str, frame: Value) -> bool {
        self.channels()
            .get(session_id)
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    fn resolve_confirm(&self, id: u64, confirmed: bool) {
        let waiter = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(confirmed);
            }
            None => debug!(id, "confirmation for unknown or expired request"),
        }
    }

    fn channels(&self) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<Value>>> {
        self.inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WsSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSurface for WsSurface {
    async fn confirm_open_link(&self, session_id: &str, url: &str) -> bool {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        let frame = json!({ "host": "confirm-open-link", "id": id, "url": url });
        let confirmed = if self.send(session_id, frame) {
            matches!(
                tokio::time::timeout(self.inner.confirm_timeout, rx).await,
                Ok(Ok(true))
            )
        } else {
            false
        };

        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        confirmed
    }

    fn open_link(&self, session_id: &str, url: &str) {
        if !self.send(session_id, json!({ "host": "open-link", "url": url })) {
            warn!(session = %session_id, "no socket to open link on");
        }
    }

    fn resize(&self, session_id: &str, height: u32) {
        self.send(session_id, json!({ "host": "resize", "height": height }));
    }
}

/// Delivers user messages injected by a UI back to that UI's page.
pub(super) fn user_message_handler(
    surface: WsSurface,
) -> impl Fn(QueuedUserMessage) + Send + Sync + 'static {
    move |message: QueuedUserMessage| {
        let frame = json!({
            "host": "user-message",
            "conversationId": message.conversation_id,
            "text": message.text,
        });
        if !surface.send(&message.session_id, frame) {
            warn!(
                session = %message.session_id,
                conversation = %message.conversation_id,
                "dropping user message: no socket for session"
            );
        }
    }
}

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Close a bridge session so it can no longer be bound.
pub async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.bridge.close_session(&id).await {
        state.bridge.surface().detach(&id);
        Ok(Json(json!({ "ok": true })))
    } else {
        Err(ApiError::not_found("session not found"))
    }
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Wait for the handshake frame.
    let first = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(text.as_str()) {
                Ok(frame) => break frame,
                Err(e) => warn!(error = %e, "ignoring non-JSON frame before handshake"),
            },
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => {}
        }
    };

    let (session_id, mut rpc_rx) = match state.bridge.bind(&first).await {
        Ok(bound) => bound,
        Err(e) => {
            warn!(error = %e, "rejecting bridge socket");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    info!(session = %session_id, "bridge socket bound");

    let (host_tx, mut host_rx) = mpsc::unbounded_channel();
    let surface = state.bridge.surface().clone();
    surface.attach(&session_id, host_tx);

    if let Err(e) = state.bridge.handle_message(&session_id, first).await {
        warn!(session = %session_id, error = %e, "handshake frame rejected");
    }

    // Forward bridge responses and host frames to the page.
    let mut send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                Some(frame) = rpc_rx.recv() => frame,
                Some(frame) = host_rx.recv() => frame,
                else => break,
            };
            if sender
                .send(Message::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let recv_state = Arc::clone(&state);
    let recv_session = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let frame: Value = match serde_json::from_str(text.as_str()) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(session = %recv_session, error = %e, "ignoring non-JSON frame");
                    continue;
                }
            };
            if frame.get("host").and_then(Value::as_str) == Some("confirm-result") {
                if let Some(id) = frame.get("id").and_then(Value::as_u64) {
                    let confirmed = frame
                        .get("confirmed")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    recv_state.bridge.surface().resolve_confirm(id, confirmed);
                }
                continue;
            }
            if let Err(e) = recv_state.bridge.handle_message(&recv_session, frame).await {
                warn!(session = %recv_session, error = %e, "bridge session gone");
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    surface.detach(&session_id);
    state.bridge.release(&session_id).await;
    debug!(session = %session_id, "bridge socket closed");
}
