//! Tool provider management routes under `/api/mcp`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use mcp::CallToolResult;
use runtime::ToolHost;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::AppState;
use crate::config::ProviderSpec;
use crate::error::ApiError;

pub async fn list(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "servers": state.registry.list().await }))
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<ProviderSpec>,
) -> Result<Json<Value>, ApiError> {
    let (id, transport) = spec.into_transport()?;
    let kind = transport.kind();
    state.registry.register(&id, transport).await?;
    info!(provider = %id, kind, "provider registered over http");
    Ok(with_servers(&state, "connected").await)
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.registry.remove(&id).await?;
    Ok(with_servers(&state, "removed").await)
}

pub async fn reconnect(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.registry.reconnect(&id).await?;
    Ok(with_servers(&state, "reconnected").await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallBody {
    #[serde(default)]
    server_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Call a provider tool directly, outside any model run.
pub async fn tool_call(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ToolCallBody>,
) -> Result<Json<CallToolResult>, ApiError> {
    let (Some(server_id), Some(name)) = (body.server_id, body.name) else {
        return Err(ApiError::bad_request("serverId and name are required"));
    };
    let arguments = body.arguments.unwrap_or_else(|| json!({}));
    let result = state
        .registry
        .call_tool(&server_id, &name, arguments)
        .await?;
    Ok(Json(result))
}

async fn with_servers(state: &AppState, status: &str) -> Json<Value> {
    Json(json!({ "status": status, "servers": state.registry.list().await }))
}
