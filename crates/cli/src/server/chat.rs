use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use runtime::{ChatRequest, EventSink, UiMount, WireEvent};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    #[serde(flatten)]
    request: ChatRequest,

    /// Marks the conversation's turn as in progress while the run lasts.
    #[serde(default)]
    conversation_id: Option<String>,
}

/// Run one chat request and stream its events as SSE.
///
/// The run always finishes: a client that goes away stops receiving
/// events, but tool calls already requested still complete.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Event>(64);
    tokio::spawn(drive(state, body, tx));

    let stream = ReceiverStream::new(rx).map(Ok);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn drive(state: Arc<AppState>, body: ChatBody, tx: mpsc::Sender<Event>) {
    let ChatBody {
        request,
        conversation_id,
    } = body;
    // Held until this task ends, however it ends.
    let _turn = conversation_id
        .as_ref()
        .map(|id| state.bridge.slots().begin(id.clone()));

    let (sink, mut events) = EventSink::channel();
    let run_state = Arc::clone(&state);
    let run = async move { run_state.orchestrator.run(request, &sink).await };
    tokio::pin!(run);

    let mut running = true;
    let mut client_gone = false;
    loop {
        tokio::select! {
            termination = &mut run, if running => {
                running = false;
                debug!(?termination, "chat run finished");
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if client_gone {
                    continue;
                }
                let event = to_sse(&state, event, conversation_id.as_deref()).await;
                if tx.send(event).await.is_err() {
                    info!("chat client disconnected, finishing run");
                    client_gone = true;
                }
            }
        }
    }
}

async fn to_sse(state: &AppState, event: WireEvent, conversation_id: Option<&str>) -> Event {
    let event = match event {
        WireEvent::UiResource(mut resource) => {
            let mount = UiMount::from_resource(&resource, conversation_id.map(str::to_string));
            resource.session_id = Some(state.bridge.open_session(mount).await);
            WireEvent::UiResource(resource)
        }
        other => other,
    };
    Event::default()
        .event(event.name())
        .data(event.payload().to_string())
}

#[cfg(test)]
mod tests {
    use super::super::tests::{mock_model, serve_mock, state_with_model, text_turn, tool_call_turn};
    use super::super::router;
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{HeaderMap, Request, StatusCode, header};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use http_body_util::BodyExt;
    use mcp::TransportConfig;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    /// Streamable-HTTP tool provider with one UI-backed tool.
    async fn mock_weather_server() -> String {
        let app = Router::new().route("/mcp", post(weather_rpc));
        format!("{}/mcp", serve_mock(app).await)
    }

    async fn weather_rpc(Json(frame): Json<Value>) -> Response {
        let Some(id) = frame.get("id").cloned() else {
            return StatusCode::ACCEPTED.into_response();
        };
        let result = match frame["method"].as_str() {
            Some("initialize") => json!({
                "protocolVersion": frame["params"]["protocolVersion"],
                "capabilities": {"tools": {"listChanged": true}, "resources": {}},
                "serverInfo": {"name": "weather", "version": "1.0.0"}
            }),
            Some("tools/list") => json!({"tools": [{
                "name": "forecast",
                "description": "Forecast for a city",
                "inputSchema": {"type": "object", "properties": {"city": {"type": "string"}}},
                "_meta": {"ui": {"resourceUri": "ui://weather/forecast"}}
            }]}),
            Some("resources/list") => json!({"resources": []}),
            Some("tools/call") => json!({
                "content": [{"type": "text", "text": "Sunny, 21C"}],
                "isError": false
            }),
            Some("resources/read") => json!({"contents": [{
                "uri": "ui://weather/forecast",
                "mimeType": "text/html",
                "text": "<html><body>forecast</body></html>"
            }]}),
            _ => {
                let error = json!({"code": -32601, "message": "method not found"});
                return Json(json!({"jsonrpc": "2.0", "id": id, "error": error})).into_response();
            }
        };
        let mut headers = HeaderMap::new();
        headers.insert("mcp-session-id", "weather-session".parse().unwrap());
        (headers, Json(json!({"jsonrpc": "2.0", "id": id, "result": result}))).into_response()
    }

    async fn post_chat(state: &Arc<AppState>, body: Value) -> Response {
        let request = Request::post("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        router(Arc::clone(state)).oneshot(request).await.unwrap()
    }

    /// Split an SSE body into `(event, data)` frames.
    fn frames(body: &str) -> Vec<(String, Value)> {
        body.split("\n\n")
            .filter(|frame| !frame.trim().is_empty())
            .map(|frame| {
                let mut lines = frame.lines();
                let event = lines.next().and_then(|l| l.strip_prefix("event:")).unwrap();
                let data = lines.next().and_then(|l| l.strip_prefix("data:")).unwrap();
                (
                    event.trim().to_string(),
                    serde_json::from_str(data.trim()).unwrap(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn chat_streams_framed_events_and_binds_ui_sessions() {
        let (model_url, requests) = mock_model(vec![
            tool_call_turn("weather__forecast", json!({"city": "Paris"})),
            text_turn("Sunny in Paris."),
        ])
        .await;
        let state = state_with_model(&model_url);
        let url = mock_weather_server().await;
        state
            .registry
            .register("weather", TransportConfig::HttpStream { url })
            .await
            .unwrap();

        let response = post_chat(
            &state,
            json!({
                "messages": [{"role": "user", "content": "Forecast for Paris?"}],
                "conversationId": "c1"
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let frames = frames(std::str::from_utf8(&bytes).unwrap());
        let names: Vec<&str> = frames.iter().map(|(name, _)| name.as_str()).collect();
        for expected in ["tool_call", "tool_result", "ui_resource", "text_delta"] {
            assert!(names.contains(&expected), "missing {expected} in {names:?}");
        }
        assert_eq!(names.last(), Some(&"done"));
        assert_eq!(requests.load(Ordering::SeqCst), 2);

        let (_, ui) = frames
            .iter()
            .find(|(name, _)| name == "ui_resource")
            .unwrap();
        assert_eq!(ui["toolName"], "weather__forecast");
        assert_eq!(ui["resourceUri"], "ui://weather/forecast");
        assert_eq!(ui["toolResult"]["content"][0]["text"], "Sunny, 21C");
        let session_id = ui["sessionId"].as_str().unwrap();

        let (bound, _channel) = state
            .bridge
            .bind(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "ui/initialize",
                "params": {"sessionId": session_id}
            }))
            .await
            .unwrap();
        assert_eq!(bound, session_id);

        assert!(!state.bridge.slots().is_active("c1"));
        state.registry.close_all().await;
    }

    #[tokio::test]
    async fn run_finishes_after_client_disconnects() {
        let (model_url, requests) = mock_model(vec![
            tool_call_turn("calc__add", json!({"a": 1, "b": 2})),
            text_turn("3"),
        ])
        .await;
        let state = state_with_model(&model_url);

        let response = post_chat(
            &state,
            json!({
                "messages": [{"role": "user", "content": "1 + 2?"}],
                "conversationId": "c2"
            }),
        )
        .await;
        drop(response);

        tokio::time::timeout(Duration::from_secs(5), async {
            while requests.load(Ordering::SeqCst) < 2 || state.bridge.slots().is_active("c2") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("run stopped when the client went away");
        assert_eq!(requests.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn body_accepts_conversation_id() {
        let body: ChatBody = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "system": "be brief",
            "conversationId": "c1"
        }))
        .unwrap();
        assert_eq!(body.request.messages.len(), 1);
        assert_eq!(body.request.system.as_deref(), Some("be brief"));
        assert_eq!(body.conversation_id.as_deref(), Some("c1"));
    }

    #[test]
    fn conversation_id_is_optional() {
        let body: ChatBody =
            serde_json::from_value(json!({"messages": []})).unwrap();
        assert!(body.conversation_id.is_none());
        assert!(body.request.system.is_none());
    }
}
