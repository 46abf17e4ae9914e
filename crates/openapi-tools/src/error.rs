//! Error types for `unified-openapi-tools`.

use thiserror::Error;

/// Main error type for OpenAPI spec handling and REST execution.
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// Network failure fetching a spec document (retryable).
    #[error("failed to fetch OpenAPI spec from '{url}': {message}")]
    SpecFetch { url: String, message: String },

    /// The spec document could not be parsed. Never cached.
    #[error("invalid OpenAPI spec at '{location}': {message}")]
    SpecInvalid { location: String, message: String },

    /// The operation exists (or may exist) but is outside the tool's allowed set.
    #[error("operation '{operation_id}' is not allowed for this tool")]
    OperationNotAllowed { operation_id: String },

    /// The operation id is not present in the spec.
    #[error("operation '{operation_id}' not found in spec '{location}'")]
    OperationNotFound {
        operation_id: String,
        location: String,
    },

    /// The request could not be built from the descriptor and arguments.
    #[error("request error: {0}")]
    Request(String),

    /// The upstream answered with a non-2xx status.
    #[error("upstream returned {status}: {excerpt}")]
    UpstreamStatus {
        status: u16,
        excerpt: String,
        retryable: bool,
    },

    /// Transport-level failure reaching the upstream (retryable).
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// Policy rejection or size limit from the shared HTTP layer.
    #[error("http error: {0}")]
    Http(String),
}

impl OpenApiToolsError {
    /// Whether a retry may change the outcome.
    #[must_use]
    pub fn retryable(&self) -> bool {
        match self {
            Self::SpecFetch { .. } | Self::Transport(_) => true,
            Self::UpstreamStatus { retryable, .. } => *retryable,
            Self::SpecInvalid { .. }
            | Self::OperationNotAllowed { .. }
            | Self::OperationNotFound { .. }
            | Self::Request(_)
            | Self::Http(_) => false,
        }
    }
}

impl From<unified_http_tools::HttpToolsError> for OpenApiToolsError {
    fn from(value: unified_http_tools::HttpToolsError) -> Self {
        use unified_http_tools::HttpToolsError;
        match value {
            HttpToolsError::Transport(msg) => Self::Transport(msg),
            other @ (HttpToolsError::Blocked(_) | HttpToolsError::TooLarge(_)) => {
                Self::Http(other.to_string())
            }
        }
    }
}

/// Result type alias for OpenAPI tooling operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;
