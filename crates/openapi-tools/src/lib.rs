//! OpenAPI tooling for the Unified Adapter.
//!
//! Three pieces: a TTL'd spec cache with stale-while-revalidate refresh
//! ([`cache`]), operation descriptors derived from parsed specs
//! ([`operations`]), and the REST executor that turns a descriptor plus a
//! call-scoped credential into one outbound HTTP request ([`rest`]).

pub mod cache;
pub mod error;
pub mod operations;
pub mod rest;

pub use cache::{CachedSpec, SpecCache};
pub use error::{OpenApiToolsError, Result};
pub use operations::{OperationDescriptor, OperationParameter, ParamLocation};
pub use rest::RestExecutor;
