//! Shared outbound HTTP concerns for the Unified Adapter.
//!
//! Used by both the REST executor (`unified-openapi-tools`) and the adapter
//! binary (MCP proxying, credential resolution).

pub mod auth;
pub mod redact;
pub mod safety;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpToolsError {
    /// The outbound request was rejected by policy before it was sent.
    #[error("outbound HTTP blocked: {0}")]
    Blocked(String),

    /// Transport-level failure (connect, TLS, read).
    #[error("http transport error: {0}")]
    Transport(String),

    /// The response body exceeded the configured size limit.
    #[error("response too large: exceeded {0} bytes")]
    TooLarge(usize),
}

pub type Result<T> = std::result::Result<T, HttpToolsError>;
