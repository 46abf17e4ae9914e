//! Auth templates and call-scoped credential placement.
//!
//! An [`AuthTemplate`] is the declarative half stored with a tool definition:
//! it says *where* a credential goes (header vs query) and how its value is
//! formatted. A [`ResolvedCredential`] is the transient other half: the
//! materialized secret bound to one outbound request. The secret is zeroized
//! on drop and never appears in `Debug` output.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

fn default_api_key_name() -> String {
    "Authorization".to_string()
}

/// Where an api-key credential is injected on the outbound request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialLocation {
    #[default]
    Header,
    Query,
}

/// Declarative auth template carried by a tool definition.
///
/// Describes how a resolved credential is placed on the request. It never
/// contains secret material itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthTemplate {
    #[default]
    None,
    ApiKey {
        /// Header or query parameter name the key is sent under.
        #[serde(default = "default_api_key_name")]
        name: String,
        #[serde(default, rename = "in")]
        location: CredentialLocation,
        /// Optional template for the sent value, with `{field}` placeholders
        /// filled from the resolved credential map (e.g. `"Token {api_key}"`).
        #[serde(default)]
        value_template: Option<String>,
    },
    Bearer,
    Basic,
}

/// The kind of credential that was materialized for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    None,
    ApiKey,
    Bearer,
    Basic,
}

enum Placement {
    None,
    Header { name: String, value: Zeroizing<String> },
    Query { name: String, value: Zeroizing<String> },
}

/// Call-scoped credential material plus its placement instructions.
///
/// Constructed immediately before one executor invocation and dropped at the
/// end of that call. The only code path allowed to read the secret is the one
/// that writes it into the outbound request's auth slot (plus the error
/// scrubber, which reads it solely to remove it from text).
pub struct ResolvedCredential {
    kind: CredentialKind,
    placement: Placement,
}

impl ResolvedCredential {
    #[must_use]
    pub fn none() -> Self {
        Self {
            kind: CredentialKind::None,
            placement: Placement::None,
        }
    }

    #[must_use]
    pub fn header(kind: CredentialKind, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind,
            placement: Placement::Header {
                name: name.into(),
                value: Zeroizing::new(value.into()),
            },
        }
    }

    #[must_use]
    pub fn query(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: CredentialKind::ApiKey,
            placement: Placement::Query {
                name: name.into(),
                value: Zeroizing::new(value.into()),
            },
        }
    }

    #[must_use]
    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self::header(
            CredentialKind::Bearer,
            "Authorization",
            format!("Bearer {}", token.as_ref()),
        )
    }

    #[must_use]
    pub fn basic(username: &str, password: &str) -> Self {
        let b64 = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        Self::header(CredentialKind::Basic, "Authorization", format!("Basic {b64}"))
    }

    #[must_use]
    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    /// Header name/value to attach, if this credential is header-placed.
    #[must_use]
    pub fn header_pair(&self) -> Option<(&str, &str)> {
        match &self.placement {
            Placement::Header { name, value } => Some((name.as_str(), value.as_str())),
            _ => None,
        }
    }

    /// Query parameter name/value to append, if this credential is query-placed.
    #[must_use]
    pub fn query_pair(&self) -> Option<(&str, &str)> {
        match &self.placement {
            Placement::Query { name, value } => Some((name.as_str(), value.as_str())),
            _ => None,
        }
    }

    /// Apply a header-placed credential to an outbound request builder.
    ///
    /// Query-placed credentials are appended during URL construction instead.
    #[must_use]
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.header_pair() {
            Some((name, value)) => request.header(name, value),
            None => request,
        }
    }

    /// The raw secret, exposed only so error text can be scrubbed of it.
    #[must_use]
    pub fn secret(&self) -> Option<&str> {
        match &self.placement {
            Placement::None => None,
            Placement::Header { value, .. } | Placement::Query { value, .. } => {
                Some(value.as_str())
            }
        }
    }
}

impl std::fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = match &self.placement {
            Placement::None => "none".to_string(),
            Placement::Header { name, .. } => format!("header:{name}"),
            Placement::Query { name, .. } => format!("query:{name}"),
        };
        f.debug_struct("ResolvedCredential")
            .field("kind", &self.kind)
            .field("placement", &slot)
            .field("value", &"***")
            .finish()
    }
}
