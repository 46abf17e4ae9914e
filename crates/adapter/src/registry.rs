//! Tool registry.
//!
//! Stored records expand into one [`ToolDefinition`] per exposed tool (one
//! per allowed REST operation, one per proxied MCP tool). Definitions live in
//! an immutable, versioned [`RegistrySnapshot`] published behind a swap
//! pointer: readers always see a complete snapshot, and a future live-reload
//! is "publish a new snapshot", never "mutate in place". Today the only
//! publisher is startup, so admin edits become visible on restart.

use crate::error::{ToolError, ToolErrorKind};
use crate::store::{AdapterKind, CredentialMode, ToolRecord};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use unified_http_tools::auth::AuthTemplate;
use unified_http_tools::safety::check_scheme;
use unified_openapi_tools::{SpecCache, cache};
use url::Url;

/// Reference to the credential a tool call resolves.
#[derive(Debug, Clone)]
pub struct CredentialRef {
    pub mode: CredentialMode,
    pub credential_id: Option<i64>,
    pub credential_name: Option<String>,
    pub environment: String,
}

/// Backend a tool call routes to. Exactly one variant per definition,
/// selected by the stored record's adapter kind.
#[derive(Debug, Clone)]
pub enum ToolBackend {
    Rest {
        openapi_url: String,
        base_url: String,
        operation_id: String,
        /// Operation ids this tool may ever resolve (empty = all).
        allowed_operations: HashSet<String>,
        auth: AuthTemplate,
    },
    McpProxy {
        server_url: Url,
        /// Tool name as the upstream knows it; forwarded unmodified.
        upstream_tool: String,
    },
}

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Exposed name: `mcp_<provider>_<operation>`.
    pub name: String,
    pub description: String,
    pub provider: String,
    pub category: String,
    pub tags: Vec<String>,
    pub enabled: bool,
    /// False for operations the spec declares but the tool's allowed set
    /// excludes. Such definitions never appear in discovery and fail lookup
    /// with `OperationNotAllowed`; they exist so an out-of-set invocation is
    /// distinguishable from an unknown tool.
    pub operation_allowed: bool,
    pub backend: ToolBackend,
    pub credential: CredentialRef,
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Upstream host this tool dials, used for per-host admission.
    #[must_use]
    pub fn target_host(&self) -> Option<String> {
        match &self.backend {
            ToolBackend::Rest { base_url, .. } => Url::parse(base_url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string)),
            ToolBackend::McpProxy { server_url, .. } => {
                server_url.host_str().map(str::to_string)
            }
        }
    }
}

/// Immutable view of the whole catalog at one point in time.
#[derive(Debug)]
pub struct RegistrySnapshot {
    pub version: u64,
    tools: Vec<Arc<ToolDefinition>>,
    by_name: HashMap<String, usize>,
}

impl RegistrySnapshot {
    fn empty() -> Self {
        Self {
            version: 0,
            tools: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    fn get(&self, name: &str) -> Option<&Arc<ToolDefinition>> {
        self.by_name.get(name).map(|idx| &self.tools[*idx])
    }
}

/// Discovery filter for [`ToolRegistry::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// When set, only tools in this category.
    pub category: Option<String>,
    /// Include disabled tools (admin/debug views only).
    pub include_disabled: bool,
}

pub struct ToolRegistry {
    allowlist: Option<HashSet<String>>,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    version: AtomicU64,
}

impl ToolRegistry {
    #[must_use]
    pub fn new(allowlist: Option<HashSet<String>>) -> Self {
        Self {
            allowlist,
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::empty())),
            version: AtomicU64::new(0),
        }
    }

    /// Build a fresh snapshot from stored records and publish it atomically.
    ///
    /// Records that cannot be made executable (missing spec, bad URL, spec
    /// fetch failure) are skipped with a warning rather than failing the
    /// whole load. Returns the number of registered definitions.
    pub async fn load(&self, records: &[ToolRecord], specs: &SpecCache) -> usize {
        let mut tools: Vec<Arc<ToolDefinition>> = Vec::new();

        for record in records {
            match record.adapter_type {
                AdapterKind::Rest => match build_rest_tools(record, specs).await {
                    Ok(expanded) => tools.extend(expanded.into_iter().map(Arc::new)),
                    Err(e) => {
                        tracing::warn!(tool = %record.name, error = %e, "skipping REST tool");
                    }
                },
                AdapterKind::Mcp => match build_mcp_tools(record) {
                    Ok(expanded) => tools.extend(expanded.into_iter().map(Arc::new)),
                    Err(e) => {
                        tracing::warn!(tool = %record.name, error = %e, "skipping non-executable tool");
                    }
                },
            }
        }

        tools.sort_by(|a, b| a.name.cmp(&b.name));

        let mut by_name = HashMap::with_capacity(tools.len());
        for (idx, tool) in tools.iter().enumerate() {
            if by_name.contains_key(&tool.name) {
                tracing::warn!(tool = %tool.name, "duplicate exposed tool name; keeping first");
                continue;
            }
            by_name.insert(tool.name.clone(), idx);
        }

        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        let count = by_name.len();
        let snapshot = Arc::new(RegistrySnapshot {
            version,
            tools,
            by_name,
        });
        *self.snapshot.write() = snapshot;
        count
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Resolve one exposed tool name to its definition.
    ///
    /// The allowlist filters before anything else: a name outside it is
    /// indistinguishable from an unregistered one. Disabled tools fail with
    /// their own kind so callers and telemetry can tell the cases apart.
    ///
    /// # Errors
    ///
    /// `ToolNotFound` or `ToolDisabled`.
    pub fn lookup(&self, name: &str) -> Result<Arc<ToolDefinition>, ToolError> {
        let snapshot = self.snapshot();
        let Some(def) = snapshot.get(name) else {
            return Err(ToolError::not_found(name));
        };
        if !self.allows(def) {
            return Err(ToolError::not_found(name));
        }
        if !def.operation_allowed {
            return Err(ToolError::new(
                ToolErrorKind::OperationNotAllowed,
                format!("operation behind '{name}' is not in the tool's allowed set"),
            ));
        }
        if !def.enabled {
            return Err(ToolError::disabled(name));
        }
        Ok(Arc::clone(def))
    }

    /// Enumerate exposed tools, allowlist first, then enabled, then category.
    /// Output is sorted by name, so identical registries list identically.
    #[must_use]
    pub fn list(&self, filter: &ListFilter) -> Vec<Arc<ToolDefinition>> {
        let snapshot = self.snapshot();
        snapshot
            .tools
            .iter()
            .filter(|def| def.operation_allowed)
            .filter(|def| self.allows(def))
            .filter(|def| filter.include_disabled || def.enabled)
            .filter(|def| {
                filter
                    .category
                    .as_deref()
                    .is_none_or(|cat| def.category == cat)
            })
            .cloned()
            .collect()
    }

    fn allows(&self, def: &ToolDefinition) -> bool {
        let Some(allow) = &self.allowlist else {
            return true;
        };
        allow.contains(&def.name) || allow.contains(&def.provider)
    }
}

async fn build_rest_tools(
    record: &ToolRecord,
    specs: &SpecCache,
) -> Result<Vec<ToolDefinition>, ToolError> {
    let openapi_url = record
        .openapi_url
        .as_deref()
        .ok_or_else(|| missing("REST tool has no openapi_url"))?;

    let spec = specs.get(openapi_url).await.map_err(ToolError::from)?;

    let base_candidate = record
        .base_url
        .clone()
        .or_else(|| spec.server_url.clone())
        .ok_or_else(|| missing("spec declares no server URL and no base_url override is set"))?;
    let base_url = cache::resolve_base_url(openapi_url, &base_candidate).map_err(ToolError::from)?;

    let auth = parse_auth_template(record);
    let allowed: HashSet<String> = record.operation_ids.iter().cloned().collect();
    let credential = credential_ref(record);

    let mut operation_ids: Vec<&String> = spec.operations.keys().collect();
    operation_ids.sort();

    let mut out = Vec::with_capacity(operation_ids.len());
    for operation_id in operation_ids {
        let descriptor = &spec.operations[operation_id];
        let description = if descriptor.description.is_empty() {
            record.description.clone()
        } else {
            descriptor.description.clone()
        };

        out.push(ToolDefinition {
            name: format_tool_name(&record.name, operation_id),
            description,
            provider: record.provider.clone(),
            category: record.category.clone(),
            tags: record.tags.clone(),
            enabled: record.enabled,
            operation_allowed: allowed.is_empty() || allowed.contains(operation_id),
            backend: ToolBackend::Rest {
                openapi_url: openapi_url.to_string(),
                base_url: base_url.clone(),
                operation_id: operation_id.clone(),
                allowed_operations: allowed.clone(),
                auth: auth.clone(),
            },
            credential: credential.clone(),
            input_schema: descriptor.input_schema(),
        });
    }

    Ok(out)
}

fn build_mcp_tools(record: &ToolRecord) -> Result<Vec<ToolDefinition>, ToolError> {
    let raw_url = record
        .mcp_server_url
        .as_deref()
        .ok_or_else(|| missing("MCP tool has no server URL"))?;
    let server_url = Url::parse(raw_url)
        .map_err(|e| missing(format!("invalid MCP server URL: {e}")))?;
    check_scheme(&server_url).map_err(|e| missing(e.to_string()))?;

    let methods: Vec<String> = if record.operation_ids.is_empty() {
        vec!["call".to_string()]
    } else {
        record.operation_ids.clone()
    };
    let credential = credential_ref(record);

    Ok(methods
        .into_iter()
        .map(|method| ToolDefinition {
            name: format_tool_name(&record.name, &method),
            description: record.description.clone(),
            provider: record.provider.clone(),
            category: record.category.clone(),
            tags: record.tags.clone(),
            enabled: record.enabled,
            operation_allowed: true,
            backend: ToolBackend::McpProxy {
                server_url: server_url.clone(),
                upstream_tool: method,
            },
            credential: credential.clone(),
            // Proxied tools accept whatever the upstream accepts.
            input_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": true,
            }),
        })
        .collect())
}

fn credential_ref(record: &ToolRecord) -> CredentialRef {
    CredentialRef {
        mode: record.credential_mode,
        credential_id: record.credential_id,
        credential_name: record.credential_name.clone(),
        environment: record.credential_environment.clone(),
    }
}

fn parse_auth_template(record: &ToolRecord) -> AuthTemplate {
    if record.auth_config.is_null()
        || record
            .auth_config
            .as_object()
            .is_some_and(serde_json::Map::is_empty)
    {
        return AuthTemplate::None;
    }
    match serde_json::from_value(record.auth_config.clone()) {
        Ok(auth) => auth,
        Err(e) => {
            tracing::warn!(tool = %record.name, error = %e, "unparseable auth template; treating as none");
            AuthTemplate::None
        }
    }
}

fn missing(message: impl Into<String>) -> ToolError {
    ToolError::new(ToolErrorKind::ToolNotFound, message)
}

/// Exposed tool name: `mcp_<base>_<operation>`, sanitized to lowercase
/// `[a-z0-9_]` for compatibility with the platform's tool-name parser.
#[must_use]
pub fn format_tool_name(base: &str, operation: &str) -> String {
    format!("mcp_{}_{}", sanitize_name(base), sanitize_name(operation))
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AdapterKind, CredentialMode};
    use axum::Router;
    use axum::routing::get;
    use chrono::Utc;
    use std::time::Duration;
    use unified_http_tools::safety::OutboundHttpSafety;

    const SPEC_JSON: &str = r#"{
        "openapi": "3.0.0",
        "info": { "title": "Pets", "version": "1.0" },
        "servers": [{ "url": "/v1" }],
        "paths": {
            "/pets": {
                "get": {
                    "operationId": "listPets",
                    "responses": { "200": { "description": "ok" } }
                },
                "post": {
                    "operationId": "createPet",
                    "responses": { "200": { "description": "ok" } }
                }
            },
            "/admin": {
                "delete": {
                    "operationId": "dropEverything",
                    "responses": { "200": { "description": "ok" } }
                }
            }
        }
    }"#;

    async fn serve_spec() -> String {
        let app = Router::new().route("/openapi.json", get(|| async { SPEC_JSON }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}/openapi.json")
    }

    fn rest_record(name: &str, spec_url: &str, operation_ids: &[&str], enabled: bool) -> ToolRecord {
        ToolRecord {
            id: 1,
            name: name.to_string(),
            description: "record description".into(),
            provider: name.to_string(),
            category: "dev".into(),
            adapter_type: AdapterKind::Rest,
            enabled,
            mcp_server_url: None,
            openapi_url: Some(spec_url.to_string()),
            base_url: None,
            operation_ids: operation_ids.iter().map(ToString::to_string).collect(),
            auth_config: serde_json::json!({}),
            tags: vec![],
            credential_mode: CredentialMode::Hosted,
            credential_id: None,
            credential_name: None,
            credential_environment: "production".into(),
            org_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn mcp_record(name: &str, url: &str, methods: &[&str]) -> ToolRecord {
        let mut record = rest_record(name, "unused", methods, true);
        record.adapter_type = AdapterKind::Mcp;
        record.openapi_url = None;
        record.mcp_server_url = Some(url.to_string());
        record
    }

    fn specs() -> SpecCache {
        SpecCache::new(Duration::from_secs(60), OutboundHttpSafety::permissive())
    }

    #[tokio::test]
    async fn operations_outside_the_allowed_set_are_not_invocable() {
        let spec_url = serve_spec().await;
        let registry = ToolRegistry::new(None);
        let records = vec![rest_record("pets", &spec_url, &["listPets", "createPet"], true)];

        registry.load(&records, &specs()).await;
        assert!(registry.lookup("mcp_pets_listpets").is_ok());
        assert!(registry.lookup("mcp_pets_createpet").is_ok());

        // dropEverything exists in the spec but is outside the allowed set:
        // distinguishable from an unknown tool, absent from discovery.
        assert_eq!(
            registry.lookup("mcp_pets_dropeverything").unwrap_err().kind,
            ToolErrorKind::OperationNotAllowed
        );
        assert_eq!(
            registry.lookup("mcp_pets_no_such_tool").unwrap_err().kind,
            ToolErrorKind::ToolNotFound
        );
        let listed: Vec<String> = registry
            .list(&ListFilter::default())
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(listed, vec!["mcp_pets_createpet", "mcp_pets_listpets"]);
    }

    #[tokio::test]
    async fn base_url_resolves_relative_server_against_spec_location() {
        let spec_url = serve_spec().await;
        let registry = ToolRegistry::new(None);
        registry
            .load(&[rest_record("pets", &spec_url, &["listPets"], true)], &specs())
            .await;

        let def = registry.lookup("mcp_pets_listpets").expect("tool");
        let ToolBackend::Rest { base_url, .. } = &def.backend else {
            panic!("expected REST backend");
        };
        let spec_base = spec_url.trim_end_matches("/openapi.json");
        assert_eq!(base_url, &format!("{spec_base}/v1"));
    }

    #[tokio::test]
    async fn disabled_tool_is_listed_nowhere_but_lookup_says_disabled() {
        let spec_url = serve_spec().await;
        let registry = ToolRegistry::new(None);
        registry
            .load(&[rest_record("pets", &spec_url, &["listPets"], false)], &specs())
            .await;

        let err = registry.lookup("mcp_pets_listpets").unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::ToolDisabled);

        assert!(registry.list(&ListFilter::default()).is_empty());
        let all = registry.list(&ListFilter {
            include_disabled: true,
            ..ListFilter::default()
        });
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn allowlist_hides_tools_as_if_unregistered() {
        let spec_url = serve_spec().await;
        let allow: HashSet<String> = ["mcp_pets_listpets".to_string()].into_iter().collect();
        let registry = ToolRegistry::new(Some(allow));
        registry
            .load(
                &[rest_record("pets", &spec_url, &["listPets", "createPet"], true)],
                &specs(),
            )
            .await;

        assert!(registry.lookup("mcp_pets_listpets").is_ok());
        let err = registry.lookup("mcp_pets_createpet").unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::ToolNotFound);
        assert_eq!(registry.list(&ListFilter::default()).len(), 1);
    }

    #[tokio::test]
    async fn provider_name_satisfies_the_allowlist() {
        let spec_url = serve_spec().await;
        let allow: HashSet<String> = ["pets".to_string()].into_iter().collect();
        let registry = ToolRegistry::new(Some(allow));
        registry
            .load(&[rest_record("pets", &spec_url, &["listPets"], true)], &specs())
            .await;
        assert!(registry.lookup("mcp_pets_listpets").is_ok());
    }

    #[tokio::test]
    async fn listing_is_sorted_and_repeatable() {
        let spec_url = serve_spec().await;
        let registry = ToolRegistry::new(None);
        registry
            .load(&[rest_record("pets", &spec_url, &[], true)], &specs())
            .await;

        let names: Vec<String> = registry
            .list(&ListFilter::default())
            .iter()
            .map(|d| d.name.clone())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(names.len(), 3);

        let again: Vec<String> = registry
            .list(&ListFilter::default())
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(names, again);
    }

    #[tokio::test]
    async fn mcp_record_requires_http_scheme() {
        let registry = ToolRegistry::new(None);
        let records = vec![
            mcp_record("notes", "https://notes.example.com", &["search"]),
            mcp_record("bad", "ws://bad.example.com", &["x"]),
        ];
        let count = registry.load(&records, &specs()).await;
        assert_eq!(count, 1);

        let def = registry.lookup("mcp_notes_search").expect("tool");
        let ToolBackend::McpProxy { upstream_tool, .. } = &def.backend else {
            panic!("expected MCP backend");
        };
        assert_eq!(upstream_tool, "search");
    }

    #[tokio::test]
    async fn reload_publishes_a_new_version() {
        let spec_url = serve_spec().await;
        let registry = ToolRegistry::new(None);
        registry
            .load(&[rest_record("pets", &spec_url, &["listPets"], true)], &specs())
            .await;
        let v1 = registry.snapshot().version;
        registry
            .load(&[rest_record("pets", &spec_url, &["listPets"], true)], &specs())
            .await;
        let v2 = registry.snapshot().version;
        assert!(v2 > v1);
    }

    #[test]
    fn tool_names_are_sanitized() {
        assert_eq!(
            format_tool_name("My GitHub", "List-Repos"),
            "mcp_my_github_list_repos"
        );
    }
}
