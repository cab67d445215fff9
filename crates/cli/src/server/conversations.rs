//! Conversation CRUD over the SQLite store.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use storage::{Conversation, ConversationDetail, ConversationId, Role};

use super::AppState;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TitleBody {
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MessageBody {
    role: Option<String>,
    content: Option<Value>,
}

pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Conversation>>, ApiError> {
    Ok(Json(state.store.lock().await.list()?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TitleBody>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let title = required_title(body)?;
    let conversation = state.store.lock().await.create(&title)?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn load(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetail>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.store.lock().await.load(id)?))
}

pub async fn rename(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TitleBody>,
) -> Result<Json<Conversation>, ApiError> {
    let id = parse_id(&id)?;
    let title = required_title(body)?;
    Ok(Json(state.store.lock().await.rename(id, &title)?))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&id)?;
    state.store.lock().await.delete(id)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn append_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<MessageBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (Some(role), Some(content)) = (body.role, body.content) else {
        return Err(ApiError::bad_request("role and content are required"));
    };
    let role: Role = role.parse()?;
    let id = parse_id(&id)?;

    let message = state
        .store
        .lock()
        .await
        .append_message(id, role, &content)
        .map_err(|e| match e {
            storage::Error::NotFound(_) => ApiError::not_found("conversation not found"),
            other => other.into(),
        })?;
    Ok((StatusCode::CREATED, Json(json!({ "id": message.id }))))
}

fn required_title(body: TitleBody) -> Result<String, ApiError> {
    body.title
        .filter(|title| !title.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("title is required"))
}

/// Ids that cannot name a conversation are reported as missing.
fn parse_id(raw: &str) -> Result<ConversationId, ApiError> {
    raw.parse().map_err(|_| ApiError::not_found("not found"))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{send, test_state};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn conversation_lifecycle() {
        let state = test_state();

        let (status, created) = send(
            &state,
            Method::POST,
            "/api/conversations",
            Some(json!({"title": "Weather"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();
        let path = format!("/api/conversations/{id}");

        let (status, _) = send(
            &state,
            Method::POST,
            &format!("{path}/messages"),
            Some(json!({"role": "user", "content": "Forecast for Paris?"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(
            &state,
            Method::PATCH,
            &path,
            Some(json!({"title": "Paris weather"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, detail) = send(&state, Method::GET, &path, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["title"], "Paris weather");
        assert_eq!(detail["messages"][0]["content"], "Forecast for Paris?");

        let (_, listed) = send(&state, Method::GET, "/api/conversations", None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, body) = send(&state, Method::DELETE, &path, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));

        let (status, body) = send(&state, Method::GET, &path, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not found");
    }

    #[tokio::test]
    async fn create_requires_title() {
        let state = test_state();
        let (status, body) =
            send(&state, Method::POST, "/api/conversations", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "title is required");
    }

    #[tokio::test]
    async fn message_validation() {
        let state = test_state();
        let (_, created) = send(
            &state,
            Method::POST,
            "/api/conversations",
            Some(json!({"title": "t"})),
        )
        .await;
        let path = format!("/api/conversations/{}/messages", created["id"].as_str().unwrap());

        let (status, body) =
            send(&state, Method::POST, &path, Some(json!({"role": "user"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "role and content are required");

        let (status, _) = send(
            &state,
            Method::POST,
            &path,
            Some(json!({"role": "robot", "content": "beep"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing = format!(
            "/api/conversations/{}/messages",
            storage::ConversationId::new()
        );
        let (status, body) = send(
            &state,
            Method::POST,
            &missing,
            Some(json!({"role": "user", "content": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "conversation not found");
    }
}
