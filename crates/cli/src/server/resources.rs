use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use super::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ResourceQuery {
    uri: Option<String>,
}

/// Fetch a UI resource, routed to its provider by the URI authority.
pub async fn read(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResourceQuery>,
) -> Result<Json<Value>, ApiError> {
    let uri = query
        .uri
        .filter(|uri| !uri.is_empty())
        .ok_or_else(|| ApiError::bad_request("uri query parameter is required"))?;
    if !uri.starts_with("ui://") {
        return Err(ApiError::bad_request("Only ui:// URIs are supported"));
    }

    let result = state.registry.read_resource_uri(&uri).await?;
    let content = result
        .contents
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found("Resource not found"))?;
    Ok(Json(json!({
        "uri": content.uri,
        "mimeType": content.mime_type,
        "text": content.text,
    })))
}
