#![allow(dead_code)] // shared across test binaries; each uses a subset

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use unified_http_tools::safety::OutboundHttpSafety;
use unified_mcp_adapter::admin::AdminState;
use unified_mcp_adapter::build_app;
use unified_mcp_adapter::credentials::CredentialResolver;
use unified_mcp_adapter::dispatch::{Admission, CallPolicy, Dispatcher, QueuePolicy};
use unified_mcp_adapter::mcp::McpState;
use unified_mcp_adapter::platform::PlatformClient;
use unified_mcp_adapter::proxy::McpProxyExecutor;
use unified_mcp_adapter::registry::ToolRegistry;
use unified_mcp_adapter::store::{
    AdapterKind, CredentialMode, NewTool, ToolPatch, ToolRecord, ToolStore, merge_patch,
};
use unified_openapi_tools::{RestExecutor, SpecCache};

/// Spec served by [`serve_spec`]: three operations, no parameters.
pub const PETSTORE_SPEC: &str = r#"{
    "openapi": "3.0.0",
    "info": { "title": "Petstore", "version": "1.0" },
    "paths": {
        "/pets": {
            "get": {
                "operationId": "listPets",
                "summary": "List all pets",
                "responses": { "200": { "description": "ok" } }
            },
            "post": {
                "operationId": "createPet",
                "responses": { "200": { "description": "ok" } }
            }
        },
        "/admin/drop": {
            "delete": {
                "operationId": "dropEverything",
                "responses": { "200": { "description": "ok" } }
            }
        }
    }
}"#;

/// In-memory stand-in for the Postgres store.
pub struct InMemoryToolStore {
    tools: Mutex<Vec<ToolRecord>>,
    next_id: AtomicI64,
}

impl InMemoryToolStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    #[must_use]
    pub fn with_records(records: Vec<ToolRecord>) -> Self {
        let max_id = records.iter().map(|r| r.id).max().unwrap_or(0);
        Self {
            tools: Mutex::new(records),
            next_id: AtomicI64::new(max_id + 1),
        }
    }
}

#[async_trait]
impl ToolStore for InMemoryToolStore {
    async fn list_tools(&self, enabled_only: bool) -> anyhow::Result<Vec<ToolRecord>> {
        let tools = self.tools.lock();
        Ok(tools
            .iter()
            .filter(|t| !enabled_only || t.enabled)
            .cloned()
            .collect())
    }

    async fn get_tool(&self, id: i64) -> anyhow::Result<Option<ToolRecord>> {
        Ok(self.tools.lock().iter().find(|t| t.id == id).cloned())
    }

    async fn create_tool(&self, tool: NewTool) -> anyhow::Result<ToolRecord> {
        let now = Utc::now();
        let record = ToolRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name: tool.name,
            description: tool.description,
            provider: tool.provider,
            category: tool.category,
            adapter_type: tool.adapter_type,
            enabled: tool.enabled,
            mcp_server_url: tool.mcp_server_url,
            openapi_url: tool.openapi_url,
            base_url: tool.base_url,
            operation_ids: tool.operation_ids,
            auth_config: tool.auth_config,
            tags: tool.tags,
            credential_mode: tool.credential_mode,
            credential_id: tool.credential_id,
            credential_name: tool.credential_name,
            credential_environment: tool.credential_environment,
            org_id: tool.org_id,
            created_at: now,
            updated_at: now,
        };
        self.tools.lock().push(record.clone());
        Ok(record)
    }

    async fn update_tool(&self, id: i64, patch: ToolPatch) -> anyhow::Result<Option<ToolRecord>> {
        let mut tools = self.tools.lock();
        let Some(idx) = tools.iter().position(|t| t.id == id) else {
            return Ok(None);
        };
        let merged = merge_patch(tools[idx].clone(), patch);
        tools[idx] = merged.clone();
        Ok(Some(merged))
    }

    async fn delete_tool(&self, id: i64) -> anyhow::Result<bool> {
        let mut tools = self.tools.lock();
        let before = tools.len();
        tools.retain(|t| t.id != id);
        Ok(tools.len() < before)
    }
}

#[must_use]
pub fn rest_record(name: &str, spec_url: &str, operation_ids: &[&str], enabled: bool) -> ToolRecord {
    ToolRecord {
        id: 1,
        name: name.to_string(),
        description: "test tool".into(),
        provider: name.to_string(),
        category: "dev".into(),
        adapter_type: AdapterKind::Rest,
        enabled,
        mcp_server_url: None,
        openapi_url: Some(spec_url.to_string()),
        base_url: None,
        operation_ids: operation_ids.iter().map(ToString::to_string).collect(),
        auth_config: json!({}),
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

#[must_use]
pub fn mcp_record(name: &str, server_url: &str, methods: &[&str]) -> ToolRecord {
    let mut record = rest_record(name, "unused", methods, true);
    record.adapter_type = AdapterKind::Mcp;
    record.openapi_url = None;
    record.mcp_server_url = Some(server_url.to_string());
    record
}

/// Serve an axum router on an ephemeral port; returns the base URL.
pub async fn serve_router(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve stub");
    });
    format!("http://{addr}")
}

/// Serve [`PETSTORE_SPEC`]; returns the spec URL.
pub async fn serve_spec() -> String {
    let app = axum::Router::new().route(
        "/openapi.json",
        axum::routing::get(|| async { PETSTORE_SPEC }),
    );
    let base = serve_router(app).await;
    format!("{base}/openapi.json")
}

pub struct AdapterOptions {
    pub allowlist: Option<HashSet<String>>,
    pub auth_token: Option<String>,
    pub platform_base: Option<String>,
    pub max_concurrency: usize,
    pub per_host_concurrency: usize,
    pub queue_depth: usize,
    pub call_timeout: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            allowlist: None,
            auth_token: None,
            platform_base: None,
            max_concurrency: 20,
            per_host_concurrency: 8,
            queue_depth: 0,
            call_timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_base: Duration::from_millis(10),
        }
    }
}

pub struct TestAdapter {
    pub base: String,
    pub client: reqwest::Client,
}

impl TestAdapter {
    pub async fn rpc(&self, body: Value) -> Value {
        unified_test_support::jsonrpc_request(&self.client, &format!("{}/mcp", self.base), None, body)
            .await
            .expect("jsonrpc request")
    }

    /// `tools/call` and return the JSON-RPC `result` (an MCP CallToolResult).
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Value {
        let response = self
            .rpc(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": { "name": name, "arguments": arguments },
            }))
            .await;
        response
            .get("result")
            .cloned()
            .unwrap_or_else(|| panic!("missing result in {response}"))
    }

    pub async fn list_tools(&self) -> Value {
        let response = self
            .rpc(json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }))
            .await;
        response["result"]["tools"].clone()
    }
}

/// The stable error kind of a failed tool call result.
#[must_use]
pub fn error_kind(result: &Value) -> String {
    assert_eq!(result["isError"], true, "expected a tool error: {result}");
    result["structuredContent"]["kind"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

/// Assemble the full adapter in-process and serve it on an ephemeral port.
pub async fn spawn_adapter(records: Vec<ToolRecord>, opts: AdapterOptions) -> TestAdapter {
    let safety = OutboundHttpSafety::permissive();
    let specs = SpecCache::new(Duration::from_secs(300), safety.clone());

    let registry = Arc::new(ToolRegistry::new(opts.allowlist.clone()));
    registry.load(&records, &specs).await;

    let platform = PlatformClient::new(
        opts.platform_base.as_deref().unwrap_or("http://127.0.0.1:9"),
        "test-service-key",
        Duration::from_secs(2),
    );
    let credentials = CredentialResolver::new(platform, "unified-adapter-test".into());

    let queue = if opts.queue_depth == 0 {
        QueuePolicy::Reject
    } else {
        QueuePolicy::Queue {
            depth: opts.queue_depth,
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        specs,
        credentials,
        RestExecutor::new(safety.clone()),
        McpProxyExecutor::new(safety),
        Admission::new(opts.max_concurrency, opts.per_host_concurrency, queue),
        CallPolicy {
            call_timeout: opts.call_timeout,
            max_attempts: opts.max_attempts,
            retry_base: opts.retry_base,
            retry_max: Duration::from_secs(1),
        },
    ));

    let store: Arc<dyn ToolStore> = Arc::new(InMemoryToolStore::with_records(records));
    let app = build_app(
        Arc::new(McpState {
            registry,
            dispatcher,
            auth_token: opts.auth_token.clone(),
            service_name: "unified-adapter-test".into(),
        }),
        Arc::new(AdminState {
            store,
            admin_token: opts.auth_token,
        }),
    );

    let base = serve_router(app).await;
    TestAdapter {
        base,
        client: reqwest::Client::new(),
    }
}
