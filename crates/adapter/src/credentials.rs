//! Credential resolution.
//!
//! Two modes: *hosted* asks the owning platform for the credential value
//! using the adapter's internal service key; *bring-your-own* uses the value
//! supplied in the current call envelope and never touches the hosted store.
//! Either way the result is a [`ResolvedCredential`] scoped to one attempt:
//! resolved immediately before the executor runs, dropped (and zeroized)
//! right after. Errors deliberately name the mode only, never the
//! credential identifier, environment, or value.

use crate::error::{ToolError, ToolErrorKind};
use crate::platform::PlatformClient;
use crate::registry::{ToolBackend, ToolDefinition};
use crate::store::CredentialMode;
use serde_json::{Map, Value};
use unified_http_tools::auth::{AuthTemplate, CredentialKind, CredentialLocation, ResolvedCredential};

pub struct CredentialResolver {
    platform: PlatformClient,
    service_name: String,
}

impl CredentialResolver {
    #[must_use]
    pub fn new(platform: PlatformClient, service_name: String) -> Self {
        Self {
            platform,
            service_name,
        }
    }

    /// Produce the call-scoped credential for one attempt.
    ///
    /// # Errors
    ///
    /// `CredentialUnavailable`; the retryable flag depends on the failure:
    /// hosted lookups may succeed on retry, a missing bring-your-own payload
    /// cannot.
    pub async fn resolve(
        &self,
        tool: &ToolDefinition,
        call_override: Option<&Value>,
    ) -> Result<ResolvedCredential, ToolError> {
        let auth = auth_template(tool);

        if matches!(auth, AuthTemplate::None) {
            return Ok(ResolvedCredential::none());
        }

        let values = match tool.credential.mode {
            CredentialMode::Byo => {
                let Some(values) = call_override.and_then(Value::as_object) else {
                    return Err(unavailable(
                        "bring-your-own tool call is missing its credentials payload",
                        false,
                    ));
                };
                values.clone()
            }
            CredentialMode::Hosted => self.resolve_hosted(tool).await?,
        };

        materialize(&auth, &values)
    }

    async fn resolve_hosted(&self, tool: &ToolDefinition) -> Result<Map<String, Value>, ToolError> {
        let reference = &tool.credential;
        if reference.credential_id.is_none() && reference.credential_name.is_none() {
            return Err(unavailable("hosted credential reference is missing", false));
        }

        let resolved = self
            .platform
            .resolve_credential(
                reference.credential_id,
                reference.credential_name.as_deref(),
                &reference.environment,
                &self.service_name,
            )
            .await
            .map_err(|e| {
                tracing::warn!(tool = %tool.name, error = %e, "hosted credential lookup failed");
                unavailable("credential service is unreachable", true)
            })?;

        resolved.ok_or_else(|| unavailable("hosted credential not found", true))
    }
}

/// The auth template a definition carries (REST tools declare one; proxied
/// MCP tools reuse the same template shape for upstream header auth).
fn auth_template(tool: &ToolDefinition) -> AuthTemplate {
    match &tool.backend {
        ToolBackend::Rest { auth, .. } => auth.clone(),
        // Proxied upstreams authenticate with a bearer header when the tool
        // references a credential at all.
        ToolBackend::McpProxy { .. } => {
            if tool.credential.credential_id.is_some() || tool.credential.credential_name.is_some()
            {
                AuthTemplate::Bearer
            } else {
                AuthTemplate::None
            }
        }
    }
}

fn materialize(
    auth: &AuthTemplate,
    values: &Map<String, Value>,
) -> Result<ResolvedCredential, ToolError> {
    match auth {
        AuthTemplate::None => Ok(ResolvedCredential::none()),
        AuthTemplate::ApiKey {
            name,
            location,
            value_template,
        } => {
            let value = match value_template {
                Some(template) => render_template(template, values),
                None => first_value(values),
            };
            let Some(value) = value else {
                return Err(unavailable("credential payload has no usable value", false));
            };
            Ok(match location {
                CredentialLocation::Header => {
                    ResolvedCredential::header(CredentialKind::ApiKey, name.clone(), value)
                }
                CredentialLocation::Query => ResolvedCredential::query(name.clone(), value),
            })
        }
        AuthTemplate::Bearer => {
            let token = values
                .get("access_token")
                .and_then(value_as_string)
                .or_else(|| first_value(values));
            let Some(token) = token else {
                return Err(unavailable("credential payload has no usable value", false));
            };
            Ok(ResolvedCredential::bearer(token))
        }
        AuthTemplate::Basic => {
            let username = values.get("username").and_then(value_as_string);
            let password = values.get("password").and_then(value_as_string);
            match (username, password) {
                (Some(username), Some(password)) => {
                    Ok(ResolvedCredential::basic(&username, &password))
                }
                _ => Err(unavailable(
                    "basic credential payload needs username and password",
                    false,
                )),
            }
        }
    }
}

/// Fill `{field}` placeholders from the credential map.
fn render_template(template: &str, values: &Map<String, Value>) -> Option<String> {
    let mut out = template.to_string();
    for (key, value) in values {
        if let Some(v) = value_as_string(value) {
            out = out.replace(&format!("{{{key}}}"), &v);
        }
    }
    Some(out)
}

fn first_value(values: &Map<String, Value>) -> Option<String> {
    values.values().find_map(value_as_string)
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn unavailable(message: &str, retryable: bool) -> ToolError {
    ToolError::new(ToolErrorKind::CredentialUnavailable, message).retryable(retryable)
}
