//! HTTP surface: chat streaming, provider management, resources,
//! conversations, and the bridge channel for rendered tool UIs.

mod bridge;
mod chat;
mod conversations;
mod providers;
mod resources;

pub use bridge::WsSurface;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use runtime::{Orchestrator, Provider, ToolProviderRegistry, TurnSlots, UiBridge};
use serde_json::{Value, json};
use storage::ConversationStore;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

/// Request bodies above this are rejected.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub type Registry = ToolProviderRegistry;
pub type Bridge = UiBridge<Arc<Registry>, WsSurface>;

/// Shared state handed to every route.
pub struct AppState {
    pub registry: Arc<Registry>,
    pub orchestrator: Orchestrator<Provider, Arc<Registry>>,
    pub bridge: Arc<Bridge>,
    pub store: Mutex<ConversationStore>,
}

impl AppState {
    pub fn new(
        registry: Arc<Registry>,
        provider: Provider,
        max_iterations: usize,
        store: ConversationStore,
    ) -> Arc<Self> {
        let surface = WsSurface::new();
        let slots = Arc::new(TurnSlots::new());
        slots.set_handler(bridge::user_message_handler(surface.clone()));

        let orchestrator = Orchestrator::new(provider, Arc::clone(&registry))
            .with_max_iterations(max_iterations);
        let bridge = Arc::new(UiBridge::new(Arc::clone(&registry), surface, slots));

        Arc::new(Self {
            registry,
            orchestrator,
            bridge,
            store: Mutex::new(store),
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat::chat))
        .route(
            "/api/mcp/servers",
            get(providers::list).post(providers::register),
        )
        .route("/api/mcp/servers/{id}", delete(providers::remove))
        .route(
            "/api/mcp/servers/{id}/reconnect",
            post(providers::reconnect),
        )
        .route("/api/mcp/tool-call", post(providers::tool_call))
        .route("/api/resources", get(resources::read))
        .route(
            "/api/conversations",
            get(conversations::list).post(conversations::create),
        )
        .route(
            "/api/conversations/{id}",
            get(conversations::load)
                .patch(conversations::rename)
                .delete(conversations::delete),
        )
        .route(
            "/api/conversations/{id}/messages",
            post(conversations::append_message),
        )
        .route("/api/bridge/ws", get(bridge::upgrade))
        .route("/api/bridge/sessions/{id}", delete(bridge::close_session))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use http_body_util::BodyExt;
    use runtime::OpenAiBackend;
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    pub(crate) fn test_state() -> Arc<AppState> {
        state_with_model("http://127.0.0.1:9")
    }

    /// State whose model backend is the OpenAI-compatible API at `base_url`.
    pub(crate) fn state_with_model(base_url: &str) -> Arc<AppState> {
        let provider = Provider::OpenAi(
            OpenAiBackend::builder("test-key", "gpt-4o")
                .base_url(base_url)
                .build(),
        );
        AppState::new(
            Arc::new(ToolProviderRegistry::new()),
            provider,
            10,
            ConversationStore::in_memory().unwrap(),
        )
    }

    pub(crate) async fn send(
        state: &Arc<AppState>,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = router(Arc::clone(state))
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Serve `app` on an ephemeral local port and return its base URL.
    pub(crate) async fn serve_mock(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    /// Chat-completions endpoint streaming `turns` in order, repeating the
    /// last one. Returns the base URL and a count of requests served.
    pub(crate) async fn mock_model(turns: Vec<String>) -> (String, Arc<AtomicUsize>) {
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);
        let turns = Arc::new(turns);
        let app = Router::new().route(
            "/chat/completions",
            post(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let body = turns[n.min(turns.len() - 1)].clone();
                async move { ([(header::CONTENT_TYPE, "text/event-stream")], body) }
            }),
        );
        (serve_mock(app).await, requests)
    }

    fn chunk_stream(chunks: &[Value]) -> String {
        let mut body: String = chunks
            .iter()
            .map(|chunk| format!("data: {chunk}\n\n"))
            .collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    pub(crate) fn tool_call_turn(name: &str, arguments: Value) -> String {
        chunk_stream(&[
            json!({"choices": [{"delta": {"tool_calls": [{
                "index": 0,
                "id": "call_1",
                "function": {"name": name, "arguments": arguments.to_string()}
            }]}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
        ])
    }

    pub(crate) fn text_turn(text: &str) -> String {
        chunk_stream(&[
            json!({"choices": [{"delta": {"content": text}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
        ])
    }

    #[tokio::test]
    async fn health_is_ok() {
        let state = test_state();
        let (status, body) = send(&state, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let state = test_state();
        let (status, _) = send(&state, Method::GET, "/api/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
