//! The normalized error taxonomy for tool calls.
//!
//! Every terminal failure carries a stable machine-readable kind so the
//! calling gateway can decide whether to surface it as a model-visible tool
//! error or a system fault. Messages are scrubbed of credential material and
//! truncated before they leave the dispatcher.

use unified_http_tools::redact;
use unified_openapi_tools::OpenApiToolsError;

/// Upper bound on any error message returned to a caller or logged.
pub const ERROR_MESSAGE_MAX_BYTES: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    ToolDisabled,
    ToolNotFound,
    OperationNotAllowed,
    SpecInvalid,
    CredentialUnavailable,
    /// The upstream responded with a failure status.
    UpstreamError,
    /// Network-level failure reaching the upstream.
    UpstreamUnavailable,
    /// The upstream answered with something that is not the protocol.
    UpstreamProtocolError,
    Overloaded,
    Timeout,
}

impl ToolErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolDisabled => "tool_disabled",
            Self::ToolNotFound => "tool_not_found",
            Self::OperationNotAllowed => "operation_not_allowed",
            Self::SpecInvalid => "spec_invalid",
            Self::CredentialUnavailable => "credential_unavailable",
            Self::UpstreamError => "upstream_error",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::UpstreamProtocolError => "upstream_protocol_error",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {message}", kind.as_str())]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    pub retryable: bool,
    /// Upstream HTTP status, when the failure was a status response.
    pub status: Option<u16>,
}

impl ToolError {
    #[must_use]
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(kind, ToolErrorKind::UpstreamUnavailable);
        Self {
            kind,
            message: message.into(),
            retryable,
            status: None,
        }
    }

    #[must_use]
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    #[must_use]
    pub fn disabled(tool: &str) -> Self {
        Self::new(ToolErrorKind::ToolDisabled, format!("tool '{tool}' is disabled"))
    }

    #[must_use]
    pub fn not_found(tool: &str) -> Self {
        Self::new(ToolErrorKind::ToolNotFound, format!("unknown tool '{tool}'"))
    }

    #[must_use]
    pub fn overloaded() -> Self {
        Self::new(
            ToolErrorKind::Overloaded,
            "concurrency limit reached; try again later",
        )
    }

    #[must_use]
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(
            ToolErrorKind::Timeout,
            format!("call timed out after {}ms", after.as_millis()),
        )
    }

    /// Scrub known secret values from the message and bound its size.
    ///
    /// Mandatory on every path that lets an error escape the dispatcher.
    #[must_use]
    pub fn redacted(mut self, secrets: &[&str]) -> Self {
        let scrubbed = redact::scrub_secrets(&self.message, secrets);
        self.message = redact::truncate(&scrubbed, ERROR_MESSAGE_MAX_BYTES);
        self
    }
}

impl From<OpenApiToolsError> for ToolError {
    fn from(value: OpenApiToolsError) -> Self {
        let retryable = value.retryable();
        let (kind, status) = match &value {
            OpenApiToolsError::SpecFetch { .. } | OpenApiToolsError::Transport(_) => {
                (ToolErrorKind::UpstreamUnavailable, None)
            }
            // A spec that no longer contains a registered operation is treated
            // the same as one that failed to parse.
            OpenApiToolsError::SpecInvalid { .. } | OpenApiToolsError::OperationNotFound { .. } => {
                (ToolErrorKind::SpecInvalid, None)
            }
            OpenApiToolsError::OperationNotAllowed { .. } => {
                (ToolErrorKind::OperationNotAllowed, None)
            }
            // The request could not be built from the descriptor: the advertised
            // schema and the spec disagree, which is a protocol-shape fault.
            OpenApiToolsError::Request(_) => (ToolErrorKind::UpstreamProtocolError, None),
            OpenApiToolsError::UpstreamStatus { status, .. } => {
                (ToolErrorKind::UpstreamError, Some(*status))
            }
            OpenApiToolsError::Http(_) => (ToolErrorKind::UpstreamError, None),
        };

        let mut err = Self::new(kind, value.to_string()).retryable(retryable);
        err.status = status;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_have_stable_strings() {
        assert_eq!(ToolErrorKind::ToolDisabled.as_str(), "tool_disabled");
        assert_eq!(ToolErrorKind::UpstreamUnavailable.as_str(), "upstream_unavailable");
        assert_eq!(ToolErrorKind::Timeout.as_str(), "timeout");
    }

    #[test]
    fn only_upstream_unavailable_defaults_retryable() {
        assert!(ToolError::new(ToolErrorKind::UpstreamUnavailable, "x").retryable);
        assert!(!ToolError::new(ToolErrorKind::UpstreamError, "x").retryable);
        assert!(!ToolError::disabled("t").retryable);
        assert!(!ToolError::timeout(std::time::Duration::from_secs(1)).retryable);
    }

    #[test]
    fn upstream_status_maps_with_status_code() {
        let err: ToolError = OpenApiToolsError::UpstreamStatus {
            status: 503,
            excerpt: "bad".into(),
            retryable: true,
        }
        .into();
        assert_eq!(err.kind, ToolErrorKind::UpstreamError);
        assert_eq!(err.status, Some(503));
        assert!(err.retryable);
    }

    #[test]
    fn redacted_scrubs_and_bounds() {
        let long = format!("secret hunter2-token {}", "y".repeat(2000));
        let err = ToolError::new(ToolErrorKind::UpstreamError, long).redacted(&["hunter2-token"]);
        assert!(!err.message.contains("hunter2-token"));
        assert!(err.message.len() <= ERROR_MESSAGE_MAX_BYTES + 32);
    }
}
