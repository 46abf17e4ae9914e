//! OpenAPI spec cache.
//!
//! Documents are fetched on first reference, parsed once into operation
//! descriptors, and cached per location with a TTL. Expired entries are
//! served stale while a single background refetch runs
//! (stale-while-revalidate), so spec refreshes never add latency to
//! in-flight calls. Parse failures are surfaced as [`OpenApiToolsError::SpecInvalid`]
//! and never cached.

use crate::error::{OpenApiToolsError, Result};
use crate::operations::{self, OperationDescriptor};
use openapiv3::OpenAPI;
use parking_lot::RwLock;
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use unified_http_tools::safety::{self, OutboundHttpSafety};
use url::Url;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A parsed spec, reduced to what execution needs.
#[derive(Debug)]
pub struct CachedSpec {
    pub location: String,
    pub title: Option<String>,
    /// First server URL declared by the document, if any.
    pub server_url: Option<String>,
    /// Descriptors keyed by operation id.
    pub operations: HashMap<String, OperationDescriptor>,
}

#[derive(Clone)]
struct CacheEntry {
    fetched_at: Instant,
    spec: Arc<CachedSpec>,
    refreshing: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct SpecCache {
    ttl: Duration,
    client: Client,
    safety: OutboundHttpSafety,
    inner: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl SpecCache {
    #[must_use]
    pub fn new(ttl: Duration, safety: OutboundHttpSafety) -> Self {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            ttl,
            client,
            safety,
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Resolve one operation for a tool.
    ///
    /// The allowed-set check runs before anything else: it is the mechanism
    /// that keeps the exposed endpoint count bounded no matter how large the
    /// upstream API is. An empty set allows every operation in the spec.
    ///
    /// # Errors
    ///
    /// `OperationNotAllowed` for ids outside a non-empty allowed set,
    /// `OperationNotFound` for ids missing from the spec, plus any spec
    /// fetch/parse error.
    pub async fn resolve_operation(
        &self,
        location: &str,
        allowed: &HashSet<String>,
        operation_id: &str,
    ) -> Result<OperationDescriptor> {
        if !allowed.is_empty() && !allowed.contains(operation_id) {
            return Err(OpenApiToolsError::OperationNotAllowed {
                operation_id: operation_id.to_string(),
            });
        }

        let spec = self.get(location).await?;
        spec.operations
            .get(operation_id)
            .cloned()
            .ok_or_else(|| OpenApiToolsError::OperationNotFound {
                operation_id: operation_id.to_string(),
                location: location.to_string(),
            })
    }

    /// Fetch (or serve from cache) the parsed spec for a location.
    ///
    /// # Errors
    ///
    /// Returns `SpecFetch` on network failure, `SpecInvalid` on parse
    /// failure, and `Http` when the location is blocked by policy. Errors
    /// only surface on a cold cache; once a value exists, refresh failures
    /// keep serving the stale value.
    pub async fn get(&self, location: &str) -> Result<Arc<CachedSpec>> {
        let cached = self.inner.read().get(location).cloned();

        if let Some(entry) = cached {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.spec);
            }
            // Stale: serve the old value, refresh at most once in background.
            if entry
                .refreshing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let cache = self.clone();
                let location = location.to_string();
                let claimed = Arc::clone(&entry.refreshing);
                tokio::spawn(async move {
                    if let Err(e) = cache.fetch_and_store(&location).await {
                        tracing::warn!(spec = %location, error = %e, "spec refresh failed; serving stale");
                        claimed.store(false, Ordering::Release);
                    }
                });
            }
            return Ok(entry.spec);
        }

        self.fetch_and_store(location).await
    }

    async fn fetch_and_store(&self, location: &str) -> Result<Arc<CachedSpec>> {
        let spec = Arc::new(self.fetch_spec(location).await?);
        self.inner.write().insert(
            location.to_string(),
            CacheEntry {
                fetched_at: Instant::now(),
                spec: Arc::clone(&spec),
                refreshing: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(spec)
    }

    async fn fetch_spec(&self, location: &str) -> Result<CachedSpec> {
        let url = Url::parse(location).map_err(|e| OpenApiToolsError::SpecInvalid {
            location: location.to_string(),
            message: format!("invalid spec URL: {e}"),
        })?;
        self.safety.check_url(&url).await?;

        tracing::info!(spec = %location, "fetching OpenAPI spec");
        let response = self.client.get(url).send().await.map_err(|e| {
            OpenApiToolsError::SpecFetch {
                url: location.to_string(),
                message: safety::sanitize_reqwest_error(&e),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OpenApiToolsError::SpecFetch {
                url: location.to_string(),
                message: format!("http {status}"),
            });
        }

        let bytes = safety::read_body_limited(response, self.safety.max_response_bytes).await?;
        let text = std::str::from_utf8(&bytes).map_err(|_| OpenApiToolsError::SpecInvalid {
            location: location.to_string(),
            message: "document is not valid UTF-8".to_string(),
        })?;

        // JSON is a valid subset of YAML, so one parse path covers both.
        let spec: OpenAPI =
            serde_yaml::from_str(text).map_err(|e| OpenApiToolsError::SpecInvalid {
                location: location.to_string(),
                message: e.to_string(),
            })?;

        let operations = operations::extract_operations(&spec);
        tracing::debug!(spec = %location, operations = operations.len(), "parsed OpenAPI spec");

        Ok(CachedSpec {
            location: location.to_string(),
            title: Some(spec.info.title.clone()),
            server_url: operations::server_url(&spec),
            operations,
        })
    }
}

/// Resolve a base URL candidate into an absolute http(s) URL.
///
/// OpenAPI allows relative server URLs (e.g. `/api/v3`); these resolve
/// against the spec's own location so common specs work unmodified.
///
/// # Errors
///
/// Returns `SpecInvalid` when the candidate is relative and the spec
/// location is not an absolute URL to resolve it against.
pub fn resolve_base_url(spec_location: &str, candidate: &str) -> Result<String> {
    if candidate.starts_with("http://") || candidate.starts_with("https://") {
        return Ok(candidate.to_string());
    }

    let mut spec_url = Url::parse(spec_location).map_err(|e| OpenApiToolsError::SpecInvalid {
        location: spec_location.to_string(),
        message: format!("invalid spec URL: {e}"),
    })?;
    spec_url.set_fragment(None);

    let resolved = spec_url
        .join(candidate)
        .map_err(|e| OpenApiToolsError::SpecInvalid {
            location: spec_location.to_string(),
            message: format!("invalid base URL '{candidate}': {e} (set a base URL explicitly)"),
        })?;
    Ok(resolved.to_string())
}
