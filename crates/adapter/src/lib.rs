//! Unified Integrations Adapter.
//!
//! One MCP endpoint backed by heterogeneous upstreams: REST APIs described
//! by OpenAPI specs, and hosted MCP servers proxied transparently. The
//! execution engine resolves a tool, resolves its credentials, routes to the
//! right backend, and runs the call under admission, timeout, and retry
//! policy, returning one normalized result shape either way.

pub mod admin;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod mcp;
pub mod platform;
pub mod proxy;
pub mod registry;
pub mod store;

use axum::Extension;
use axum::routing::get;
use std::sync::Arc;

/// Assemble the full HTTP surface: health, MCP endpoint, admin API.
#[must_use]
pub fn build_app(mcp_state: Arc<mcp::McpState>, admin_state: Arc<admin::AdminState>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(mcp::health))
        .merge(mcp::router(mcp_state))
        .merge(admin::router().layer(Extension(admin_state)))
}
