//! Inbound MCP endpoint.
//!
//! One `POST /mcp` route speaks JSON-RPC 2.0 in the JSON response mode of
//! streamable HTTP: `initialize`, `ping`, `tools/list`, `tools/call`;
//! notifications are accepted and dropped. Discovery lists exactly the
//! enabled, allowlisted tools; invocation hands a [`CallEnvelope`] to the
//! dispatcher and maps the outcome onto an MCP `CallToolResult` (failures
//! become model-visible tool errors carrying their stable kind).

use crate::dispatch::{CallEnvelope, CallResult, CallerContext, Dispatcher};
use crate::error::ToolError;
use crate::registry::{ListFilter, ToolRegistry};
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json, Router};
use rmcp::model::{CallToolResult, Content, JsonObject, Tool};
use serde_json::{Value, json};
use std::sync::Arc;

const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

pub struct McpState {
    pub registry: Arc<ToolRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    /// Shared bearer token required on inbound calls when set.
    pub auth_token: Option<String>,
    pub service_name: String,
}

pub fn router(state: Arc<McpState>) -> Router {
    Router::new()
        .route("/mcp", post(handle_message))
        .layer(Extension(state))
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn handle_message(
    Extension(state): Extension<Arc<McpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let caller = match authorize(&state, &headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };

    let Ok(message) = serde_json::from_slice::<Value>(&body) else {
        return jsonrpc_error(Value::Null, -32700, "parse error", None);
    };

    let Some(method) = message.get("method").and_then(Value::as_str) else {
        return jsonrpc_error(Value::Null, -32600, "invalid request", None);
    };

    // Notifications carry no id and get no response body.
    let Some(id) = message.get("id").filter(|v| !v.is_null()).cloned() else {
        return StatusCode::ACCEPTED.into_response();
    };

    let params = message.get("params").cloned().unwrap_or_else(|| json!({}));

    match method {
        "initialize" => jsonrpc_result(id, initialize_result(&state, &params)),
        "ping" => jsonrpc_result(id, json!({})),
        "tools/list" => jsonrpc_result(id, json!({ "tools": tools_payload(&state.registry) })),
        "tools/call" => handle_tools_call(&state, id, &params, caller).await,
        _ => jsonrpc_error(id, -32601, format!("method not found: {method}"), None),
    }
}

fn authorize(state: &McpState, headers: &HeaderMap) -> Result<CallerContext, Response> {
    let Some(expected) = &state.auth_token else {
        return Ok(CallerContext::default());
    };

    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    if presented == Some(expected.as_str()) {
        return Ok(CallerContext {
            subject: Some("service".to_string()),
            org_id: None,
        });
    }

    Err((StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response())
}

fn initialize_result(state: &McpState, params: &Value) -> Value {
    let protocol_version = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);

    json!({
        "protocolVersion": protocol_version,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": state.service_name,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "instructions": "Unified Integrations Adapter. Aggregates platform-registered tools and proxies calls to REST or MCP upstreams.",
    })
}

fn tools_payload(registry: &ToolRegistry) -> Value {
    let tools: Vec<Tool> = registry
        .list(&ListFilter::default())
        .into_iter()
        .map(|def| {
            let schema_obj = def
                .input_schema
                .as_object()
                .cloned()
                .unwrap_or_else(JsonObject::new);
            Tool::new(
                def.name.clone(),
                def.description.clone(),
                Arc::new(schema_obj),
            )
        })
        .collect();
    serde_json::to_value(tools).unwrap_or_else(|_| json!([]))
}

async fn handle_tools_call(
    state: &McpState,
    id: Value,
    params: &Value,
    caller: CallerContext,
) -> Response {
    let Some(tool_name) = params.get("name").and_then(Value::as_str) else {
        return jsonrpc_error(id, -32602, "Invalid params: missing tool name", None);
    };
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    // Validate against the advertised schema when the tool resolves; failed
    // resolution is reported by the dispatcher with its own error kind.
    if let Ok(def) = state.registry.lookup(tool_name)
        && let Err((message, data)) = validate_arguments(&def.input_schema, &arguments)
    {
        return jsonrpc_error(id, -32602, message, Some(data));
    }

    let envelope = CallEnvelope {
        tool_name: tool_name.to_string(),
        arguments,
        caller,
    };

    let result = match state.dispatcher.dispatch(envelope).await {
        CallResult::Succeeded(value) => success_result(value),
        CallResult::Failed(error) => error_result(&error),
    };

    match serde_json::to_value(&result) {
        Ok(value) => jsonrpc_result(id, value),
        Err(e) => jsonrpc_error(id, -32603, format!("result serialization failed: {e}"), None),
    }
}

fn success_result(value: Value) -> CallToolResult {
    let text = match value.as_str() {
        Some(s) => s.to_string(),
        None => serde_json::to_string(&value).unwrap_or_else(|_| value.to_string()),
    };
    CallToolResult {
        content: vec![Content::text(text)],
        structured_content: Some(value),
        is_error: Some(false),
        meta: None,
    }
}

fn error_result(error: &ToolError) -> CallToolResult {
    CallToolResult {
        content: vec![Content::text(format!(
            "{}: {}",
            error.kind.as_str(),
            error.message
        ))],
        structured_content: Some(json!({
            "kind": error.kind.as_str(),
            "message": error.message,
            "retryable": error.retryable,
        })),
        is_error: Some(true),
        meta: None,
    }
}

/// Validate incoming arguments against the advertised input schema.
fn validate_arguments(schema: &Value, args: &Value) -> Result<(), (String, Value)> {
    let required: Vec<String> = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    let args_obj = args.as_object().cloned().unwrap_or_default();

    let mut violations: Vec<Value> = Vec::new();

    for name in &required {
        if !args_obj.contains_key(name) {
            violations.push(json!({
                "type": "missing-required-parameter",
                "parameter": name,
            }));
        }
    }

    // JSON Schema validation (types/constraints). "required" errors are
    // filtered; they are already reported with a nicer shape above.
    if let Ok(compiled) = jsonschema::validator_for(schema) {
        for e in compiled.iter_errors(args) {
            if matches!(
                e.kind(),
                jsonschema::error::ValidationErrorKind::Required { .. }
            ) {
                continue;
            }
            violations.push(json!({
                "type": "constraint-violation",
                "message": e.to_string(),
                "instancePath": e.instance_path().to_string(),
            }));
        }
    }

    if violations.is_empty() {
        return Ok(());
    }

    Err((
        format!(
            "Invalid params: validation failed with {} error(s)",
            violations.len()
        ),
        json!({
            "type": "validation-errors",
            "violations": violations,
        }),
    ))
}

fn jsonrpc_result(id: Value, result: Value) -> Response {
    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result })).into_response()
}

fn jsonrpc_error(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Response {
    let mut error = json!({ "code": code, "message": message.into() });
    if let (Some(data), Some(obj)) = (data, error.as_object_mut()) {
        obj.insert("data".to_string(), data);
    }
    Json(json!({ "jsonrpc": "2.0", "id": id, "error": error })).into_response()
}
