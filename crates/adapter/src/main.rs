use anyhow::Context as _;
use clap::Parser as _;
use std::sync::Arc;
use std::time::Duration;
use unified_http_tools::safety::OutboundHttpSafety;
use unified_mcp_adapter::admin::AdminState;
use unified_mcp_adapter::config::AdapterConfig;
use unified_mcp_adapter::credentials::CredentialResolver;
use unified_mcp_adapter::dispatch::{Admission, CallPolicy, Dispatcher, QueuePolicy};
use unified_mcp_adapter::mcp::McpState;
use unified_mcp_adapter::platform::PlatformClient;
use unified_mcp_adapter::proxy::McpProxyExecutor;
use unified_mcp_adapter::registry::ToolRegistry;
use unified_mcp_adapter::store::{PgToolStore, ToolStore};
use unified_mcp_adapter::build_app;
use unified_openapi_tools::{RestExecutor, SpecCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AdapterConfig::parse();
    init_tracing(&config);

    let store = PgToolStore::connect(&config.database_url)
        .await
        .context("connect tool store")?;
    let store: Arc<dyn ToolStore> = Arc::new(store);

    let safety = if config.allow_private_networks {
        OutboundHttpSafety::permissive()
    } else {
        OutboundHttpSafety::restricted()
    };

    let specs = SpecCache::new(
        Duration::from_secs(config.openapi_cache_secs),
        safety.clone(),
    );

    let registry = Arc::new(ToolRegistry::new(config.tool_allowlist()));
    let records = store
        .list_tools(false)
        .await
        .context("load tool definitions")?;
    let tool_count = registry.load(&records, &specs).await;
    tracing::info!(
        tools = tool_count,
        records = records.len(),
        "registry loaded; definition edits take effect on restart"
    );

    let platform = PlatformClient::new(
        &config.platform_base_url,
        &config.platform_api_key,
        Duration::from_secs(config.platform_timeout_secs),
    );
    let credentials = CredentialResolver::new(platform, config.service_name.clone());

    let queue = if config.queue_depth == 0 {
        QueuePolicy::Reject
    } else {
        QueuePolicy::Queue {
            depth: config.queue_depth,
        }
    };
    let admission = Admission::new(config.max_concurrency, config.per_host_concurrency, queue);

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        specs,
        credentials,
        RestExecutor::new(safety.clone()),
        McpProxyExecutor::new(safety),
        admission,
        CallPolicy {
            call_timeout: config.call_timeout(),
            max_attempts: config.max_attempts,
            retry_base: config.retry_base(),
            retry_max: config.retry_max(),
        },
    ));

    let mcp_state = Arc::new(McpState {
        registry,
        dispatcher,
        auth_token: config.auth_token.clone(),
        service_name: config.service_name.clone(),
    });
    let admin_state = Arc::new(AdminState {
        store,
        admin_token: config.auth_token.clone(),
    });

    let app = build_app(mcp_state, admin_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "unified adapter listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    Ok(())
}

fn init_tracing(config: &AdapterConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));

    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to install shutdown handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
