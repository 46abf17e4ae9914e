//! REST executor.
//!
//! Turns a resolved [`OperationDescriptor`] + call-scoped credential +
//! argument object into exactly one outbound HTTP request, and the response
//! into the adapter's normalized result shape: JSON passes through as-is,
//! text becomes a string, binary bodies become an opaque base64 blob. Error
//! excerpts are scrubbed of credential material and size-bounded before they
//! leave this module.

use crate::error::{OpenApiToolsError, Result};
use crate::operations::{OperationDescriptor, ParamLocation};
use base64::Engine as _;
use mime::Mime;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use std::time::Duration;
use unified_http_tools::auth::ResolvedCredential;
use unified_http_tools::redact;
use unified_http_tools::safety::{self, OutboundHttpSafety};
use url::Url;

/// Upper bound on upstream error body excerpts.
const EXCERPT_MAX_BYTES: usize = 512;

struct RequestParts {
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Value>,
}

#[derive(Clone)]
pub struct RestExecutor {
    client: Client,
    safety: OutboundHttpSafety,
}

impl RestExecutor {
    #[must_use]
    pub fn new(safety: OutboundHttpSafety) -> Self {
        Self {
            client: Client::new(),
            safety,
        }
    }

    /// Execute one REST call.
    ///
    /// # Errors
    ///
    /// `Request` when the request cannot be built from the descriptor and
    /// arguments, `UpstreamStatus` for non-2xx responses, `Transport` for
    /// network-level failures (including the per-attempt timeout), `Http`
    /// for policy rejections and oversized bodies.
    pub async fn execute(
        &self,
        base_url: &str,
        descriptor: &OperationDescriptor,
        credential: &ResolvedCredential,
        arguments: &Value,
        timeout: Duration,
    ) -> Result<Value> {
        let parts = build_parts(descriptor, arguments)?;
        let url = build_url(base_url, &parts, credential)?;
        self.safety.check_url(&url).await?;

        let method = Method::from_bytes(descriptor.method.to_uppercase().as_bytes())
            .map_err(|_| {
                OpenApiToolsError::Request(format!("invalid HTTP method '{}'", descriptor.method))
            })?;

        let mut request = self.client.request(method, url);
        for (name, value) in &parts.headers {
            request = request.header(name, value);
        }
        request = credential.apply(request);
        request = apply_body(request, descriptor, parts.body.as_ref());
        request = request.timeout(timeout);

        let secrets: Vec<&str> = credential.secret().into_iter().collect();

        let response = request.send().await.map_err(|e| {
            OpenApiToolsError::Transport(redact::scrub_secrets(
                &safety::sanitize_reqwest_error(&e),
                &secrets,
            ))
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = safety::read_body_limited(response, self.safety.max_response_bytes).await?;

        if status.is_success() {
            return Ok(decode_success(&bytes, content_type.as_deref()));
        }

        let text = String::from_utf8_lossy(&bytes);
        let excerpt = redact::truncate(&redact::scrub_secrets(&text, &secrets), EXCERPT_MAX_BYTES);
        Err(OpenApiToolsError::UpstreamStatus {
            status: status.as_u16(),
            excerpt,
            retryable: status.is_server_error() || status.as_u16() == 429,
        })
    }
}

fn build_parts(descriptor: &OperationDescriptor, arguments: &Value) -> Result<RequestParts> {
    let mut path = descriptor.path.clone();
    let mut query: Vec<(String, String)> = Vec::new();
    let mut headers: Vec<(String, String)> = Vec::new();

    for param in &descriptor.parameters {
        let value = arguments.get(&param.name).filter(|v| !v.is_null());
        let Some(value) = value else {
            if param.required {
                return Err(OpenApiToolsError::Request(format!(
                    "missing required parameter '{}'",
                    param.name
                )));
            }
            continue;
        };

        match param.location {
            ParamLocation::Path => {
                path = path.replace(&format!("{{{}}}", param.name), &value_to_string(value));
            }
            ParamLocation::Query => match value {
                // Arrays serialize form-style with explode (one pair per item).
                Value::Array(items) => {
                    for item in items {
                        query.push((param.name.clone(), value_to_string(item)));
                    }
                }
                Value::Object(_) => query.push((
                    param.name.clone(),
                    serde_json::to_string(value).unwrap_or_default(),
                )),
                other => query.push((param.name.clone(), value_to_string(other))),
            },
            ParamLocation::Header => {
                headers.push((param.name.clone(), value_to_string(value)));
            }
        }
    }

    let body = if descriptor.has_body {
        arguments.get("body").filter(|v| !v.is_null()).cloned()
    } else {
        None
    };

    if !path.starts_with('/') {
        path = format!("/{path}");
    }

    Ok(RequestParts {
        path,
        query,
        headers,
        body,
    })
}

fn build_url(base_url: &str, parts: &RequestParts, credential: &ResolvedCredential) -> Result<Url> {
    let raw = format!("{}{}", base_url.trim_end_matches('/'), parts.path);
    let mut url = Url::parse(&raw)
        .map_err(|e| OpenApiToolsError::Request(format!("invalid request URL: {e}")))?;

    let credential_pair = credential.query_pair();
    if !parts.query.is_empty() || credential_pair.is_some() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in &parts.query {
            pairs.append_pair(name, value);
        }
        if let Some((name, value)) = credential_pair {
            pairs.append_pair(name, value);
        }
    }

    Ok(url)
}

fn apply_body(
    request: reqwest::RequestBuilder,
    descriptor: &OperationDescriptor,
    body: Option<&Value>,
) -> reqwest::RequestBuilder {
    let Some(body) = body else {
        return request;
    };

    if descriptor.body_content_type.is_empty()
        || descriptor.body_content_type.starts_with("application/json")
    {
        return request.json(body);
    }

    // Non-JSON content types: a string body is sent raw, anything else is
    // serialized as JSON text under the declared content type.
    let payload = match body {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    };
    request
        .header(
            reqwest::header::CONTENT_TYPE,
            descriptor.body_content_type.clone(),
        )
        .body(payload)
}

fn decode_success(bytes: &[u8], content_type: Option<&str>) -> Value {
    if bytes.is_empty() {
        return json!({ "status": "ok" });
    }

    if is_json_content_type(content_type)
        && let Ok(value) = serde_json::from_slice::<Value>(bytes)
    {
        return value;
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => json!({
            "encoding": "base64",
            "mimeType": content_type,
            "data": base64::engine::general_purpose::STANDARD.encode(bytes),
        }),
    }
}

fn is_json_content_type(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return false;
    };
    let Ok(m) = ct.parse::<Mime>() else {
        return false;
    };
    m.subtype() == mime::JSON || m.suffix().is_some_and(|s| s == mime::JSON)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
