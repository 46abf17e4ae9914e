//! MCP proxy executor.
//!
//! Forwards a tool call to an upstream MCP server as one JSON-RPC
//! `tools/call` request. Only the envelope framing is ours; the upstream's
//! tool name and arguments pass through unmodified, and the upstream's
//! result is returned as-is.

use crate::error::{ToolError, ToolErrorKind};
use serde_json::{Value, json};
use std::time::Duration;
use unified_http_tools::auth::ResolvedCredential;
use unified_http_tools::redact;
use unified_http_tools::safety::{self, OutboundHttpSafety};
use url::Url;

/// Upper bound on upstream error excerpts.
const EXCERPT_MAX_BYTES: usize = 512;

#[derive(Clone)]
pub struct McpProxyExecutor {
    client: reqwest::Client,
    safety: OutboundHttpSafety,
}

impl McpProxyExecutor {
    #[must_use]
    pub fn new(safety: OutboundHttpSafety) -> Self {
        Self {
            client: reqwest::Client::new(),
            safety,
        }
    }

    /// Forward one tool call to an upstream MCP endpoint.
    ///
    /// # Errors
    ///
    /// `UpstreamUnavailable` for transport failures and 5xx responses
    /// (retryable), `UpstreamError` for 4xx and JSON-RPC error responses,
    /// `UpstreamProtocolError` for responses that are not the protocol
    /// (never retried; a malformed peer will not heal on retry).
    pub async fn execute(
        &self,
        server_url: &Url,
        upstream_tool: &str,
        arguments: &Value,
        credential: &ResolvedCredential,
        timeout: Duration,
    ) -> Result<Value, ToolError> {
        let endpoint = normalize_mcp_url(server_url);
        self.safety
            .check_url(&endpoint)
            .await
            .map_err(|e| ToolError::new(ToolErrorKind::UpstreamError, e.to_string()))?;

        let request_id = uuid::Uuid::new_v4().to_string();
        let envelope = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": "tools/call",
            "params": {
                "name": upstream_tool,
                "arguments": arguments,
            },
        });

        let secrets: Vec<&str> = credential.secret().into_iter().collect();

        let request = credential
            .apply(self.client.post(endpoint.clone()))
            .json(&envelope)
            .timeout(timeout);

        let response = request.send().await.map_err(|e| {
            ToolError::new(
                ToolErrorKind::UpstreamUnavailable,
                redact::scrub_secrets(&safety::sanitize_reqwest_error(&e), &secrets),
            )
        })?;

        let status = response.status();
        let body = safety::read_body_limited(response, self.safety.max_response_bytes)
            .await
            .map_err(|e| ToolError::new(ToolErrorKind::UpstreamError, e.to_string()))?;

        if status.is_server_error() {
            return Err(ToolError::new(
                ToolErrorKind::UpstreamUnavailable,
                format!("upstream http {status}"),
            ));
        }
        if !status.is_success() {
            let excerpt = excerpt(&body, &secrets);
            return Err(ToolError::new(
                ToolErrorKind::UpstreamError,
                format!("upstream http {status}: {excerpt}"),
            ));
        }

        let payload: Value = serde_json::from_slice(&body).map_err(|_| {
            ToolError::new(
                ToolErrorKind::UpstreamProtocolError,
                "upstream returned a non-JSON response to tools/call",
            )
        })?;

        if let Some(error) = payload.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("upstream returned a JSON-RPC error");
            return Err(ToolError::new(
                ToolErrorKind::UpstreamError,
                redact::truncate(&redact::scrub_secrets(message, &secrets), EXCERPT_MAX_BYTES),
            ));
        }

        match payload.get("result") {
            Some(result) => Ok(result.clone()),
            None => Err(ToolError::new(
                ToolErrorKind::UpstreamProtocolError,
                "upstream response carries neither result nor error",
            )),
        }
    }
}

fn excerpt(body: &[u8], secrets: &[&str]) -> String {
    let text = String::from_utf8_lossy(body);
    redact::truncate(&redact::scrub_secrets(&text, secrets), EXCERPT_MAX_BYTES)
}

/// Upstream MCP endpoints conventionally live under `/mcp`; append it when
/// the configured URL stops at the server root.
fn normalize_mcp_url(server_url: &Url) -> Url {
    if server_url.path().ends_with("/mcp") {
        return server_url.clone();
    }
    let mut url = server_url.clone();
    let trimmed = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{trimmed}/mcp"));
    url
}
