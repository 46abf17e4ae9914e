//! Admin API over the durable tool store.
//!
//! CRUD for tool definitions, bearer-protected with the shared adapter
//! token. Mutations write straight to storage and are inert until the
//! process restarts and rebuilds the registry snapshot; the execution path
//! never reads the store after startup.

use crate::store::{AdapterKind, NewTool, ToolPatch, ToolStore};
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::json;
use std::sync::Arc;
use url::Url;

pub struct AdminState {
    pub store: Arc<dyn ToolStore>,
    pub admin_token: Option<String>,
}

pub fn router() -> Router {
    Router::new()
        .route("/admin/v1/tools", get(list_tools).post(create_tool))
        .route(
            "/admin/v1/tools/{tool_id}",
            get(get_tool).put(update_tool).delete(delete_tool),
        )
}

fn authorize(state: &AdminState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = &state.admin_token else {
        return Ok(());
    };
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    if presented == Some(expected.as_str()) {
        return Ok(());
    }
    Err((StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response())
}

fn validate_new_tool(tool: &NewTool) -> Result<(), String> {
    if tool.name.trim().is_empty() {
        return Err("name is required".to_string());
    }
    if tool.provider.trim().is_empty() {
        return Err("provider is required".to_string());
    }
    match tool.adapter_type {
        AdapterKind::Rest => {
            if tool.openapi_url.as_deref().map_or(true, str::is_empty) {
                return Err("rest tools require openapi_url".to_string());
            }
        }
        AdapterKind::Mcp => {
            let Some(raw) = tool.mcp_server_url.as_deref().filter(|s| !s.is_empty()) else {
                return Err("mcp tools require mcp_server_url".to_string());
            };
            let ok = Url::parse(raw)
                .map(|u| u.scheme() == "http" || u.scheme() == "https")
                .unwrap_or(false);
            if !ok {
                return Err("mcp_server_url must be an http(s) URL".to_string());
            }
        }
    }
    Ok(())
}

async fn list_tools(
    Extension(state): Extension<Arc<AdminState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    match state.store.list_tools(false).await {
        Ok(tools) => Json(tools).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn create_tool(
    Extension(state): Extension<Arc<AdminState>>,
    headers: HeaderMap,
    Json(tool): Json<NewTool>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    if let Err(message) = validate_new_tool(&tool) {
        return (StatusCode::BAD_REQUEST, message).into_response();
    }
    match state.store.create_tool(tool).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn get_tool(
    Extension(state): Extension<Arc<AdminState>>,
    headers: HeaderMap,
    Path(tool_id): Path<i64>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    match state.store.get_tool(tool_id).await {
        Ok(Some(tool)) => Json(tool).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "tool not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn update_tool(
    Extension(state): Extension<Arc<AdminState>>,
    headers: HeaderMap,
    Path(tool_id): Path<i64>,
    Json(patch): Json<ToolPatch>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    match state.store.update_tool(tool_id, patch).await {
        Ok(Some(updated)) => Json(updated).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "tool not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn delete_tool(
    Extension(state): Extension<Arc<AdminState>>,
    headers: HeaderMap,
    Path(tool_id): Path<i64>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    match state.store.delete_tool(tool_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "tool not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
