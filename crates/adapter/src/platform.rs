//! Client for the owning platform's credential endpoint.
//!
//! Hosted credential resolution is the only platform call the execution path
//! makes. The internal service key authenticates the adapter itself and is
//! never related to the credentials being resolved.

use serde_json::{Map, Value, json};
use std::time::Duration;
use thiserror::Error;
use unified_http_tools::safety::sanitize_reqwest_error;

#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform could not be reached or answered with a failure status.
    #[error("credential service error: {0}")]
    Unavailable(String),
}

#[derive(Clone)]
pub struct PlatformClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl PlatformClient {
    #[must_use]
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        }
    }

    /// Look up one credential by reference.
    ///
    /// Returns `Ok(None)` when the platform reports not-found; the caller
    /// decides how that surfaces (and with which retry budget).
    ///
    /// # Errors
    ///
    /// [`PlatformError::Unavailable`] on transport failures, non-2xx
    /// statuses, and unexpected response shapes.
    pub async fn resolve_credential(
        &self,
        credential_id: Option<i64>,
        credential_name: Option<&str>,
        environment: &str,
        service_name: &str,
    ) -> Result<Option<Map<String, Value>>, PlatformError> {
        let url = format!("{}/api/credentials/resolve", self.base_url);
        let body = json!({
            "credential_id": credential_id,
            "credential_name": credential_name,
            "environment": environment,
            "service_name": service_name,
        });

        let response = self
            .client
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PlatformError::Unavailable(sanitize_reqwest_error(&e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(PlatformError::Unavailable(format!("http {status}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| PlatformError::Unavailable(sanitize_reqwest_error(&e)))?;

        Ok(payload.get("data").and_then(Value::as_object).cloned())
    }
}
