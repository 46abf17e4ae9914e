//! Durable tool-definition storage.
//!
//! The execution path treats this store as read-only input consumed once at
//! startup (see `registry`). The admin API mutates it directly; mutations are
//! inert until the process restarts and rebuilds the registry snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Rest,
    Mcp,
}

impl AdapterKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Mcp => "mcp",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rest" => Some(Self::Rest),
            "mcp" => Some(Self::Mcp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialMode {
    Hosted,
    Byo,
}

impl CredentialMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hosted => "hosted",
            Self::Byo => "byo",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hosted" => Some(Self::Hosted),
            "byo" => Some(Self::Byo),
            _ => None,
        }
    }
}

/// One stored tool definition, mirroring the `adapter_tools` table.
#[derive(Debug, Clone, Serialize)]
pub struct ToolRecord {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub provider: String,
    pub category: String,
    pub adapter_type: AdapterKind,
    pub enabled: bool,
    pub mcp_server_url: Option<String>,
    pub openapi_url: Option<String>,
    pub base_url: Option<String>,
    pub operation_ids: Vec<String>,
    /// Raw auth template JSON; parsed by the registry at load time.
    pub auth_config: Value,
    pub tags: Vec<String>,
    pub credential_mode: CredentialMode,
    pub credential_id: Option<i64>,
    pub credential_name: Option<String>,
    pub credential_environment: String,
    pub org_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create payload accepted by the admin API.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub provider: String,
    pub category: String,
    pub adapter_type: AdapterKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mcp_server_url: Option<String>,
    #[serde(default)]
    pub openapi_url: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub operation_ids: Vec<String>,
    #[serde(default)]
    pub auth_config: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_credential_mode")]
    pub credential_mode: CredentialMode,
    #[serde(default)]
    pub credential_id: Option<i64>,
    #[serde(default)]
    pub credential_name: Option<String>,
    #[serde(default = "default_environment")]
    pub credential_environment: String,
    #[serde(default)]
    pub org_id: Option<String>,
}

/// Partial update payload; absent fields keep their stored values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub provider: Option<String>,
    pub category: Option<String>,
    pub adapter_type: Option<AdapterKind>,
    pub enabled: Option<bool>,
    pub mcp_server_url: Option<Option<String>>,
    pub openapi_url: Option<Option<String>>,
    pub base_url: Option<Option<String>>,
    pub operation_ids: Option<Vec<String>>,
    pub auth_config: Option<Value>,
    pub tags: Option<Vec<String>>,
    pub credential_mode: Option<CredentialMode>,
    pub credential_id: Option<Option<i64>>,
    pub credential_name: Option<Option<String>>,
    pub credential_environment: Option<String>,
    pub org_id: Option<Option<String>>,
}

fn default_true() -> bool {
    true
}

fn default_credential_mode() -> CredentialMode {
    CredentialMode::Hosted
}

fn default_environment() -> String {
    "production".to_string()
}

#[async_trait]
pub trait ToolStore: Send + Sync {
    async fn list_tools(&self, enabled_only: bool) -> anyhow::Result<Vec<ToolRecord>>;
    async fn get_tool(&self, id: i64) -> anyhow::Result<Option<ToolRecord>>;
    async fn create_tool(&self, tool: NewTool) -> anyhow::Result<ToolRecord>;
    async fn update_tool(&self, id: i64, patch: ToolPatch) -> anyhow::Result<Option<ToolRecord>>;
    async fn delete_tool(&self, id: i64) -> anyhow::Result<bool>;
}

/// Postgres-backed store.
pub struct PgToolStore {
    pool: PgPool,
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS adapter_tools (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    provider TEXT NOT NULL,
    category TEXT NOT NULL,
    adapter_type TEXT NOT NULL,
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    mcp_server_url TEXT,
    openapi_url TEXT,
    base_url TEXT,
    operation_ids JSONB NOT NULL DEFAULT '[]',
    auth_config JSONB NOT NULL DEFAULT '{}',
    tags JSONB NOT NULL DEFAULT '[]',
    credential_mode TEXT NOT NULL DEFAULT 'hosted',
    credential_id BIGINT,
    credential_name TEXT,
    credential_environment TEXT NOT NULL DEFAULT 'production',
    org_id TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
)
";

const COLUMNS: &str = "id, name, description, provider, category, adapter_type, enabled, \
     mcp_server_url, openapi_url, base_url, operation_ids, auth_config, tags, \
     credential_mode, credential_id, credential_name, credential_environment, org_id, \
     created_at, updated_at";

impl PgToolStore {
    /// Connect and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or the schema cannot
    /// be created.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }
}

fn record_from_row(row: &PgRow) -> anyhow::Result<ToolRecord> {
    let adapter_type: String = row.try_get("adapter_type")?;
    let credential_mode: String = row.try_get("credential_mode")?;
    let operation_ids: Value = row.try_get("operation_ids")?;
    let tags: Value = row.try_get("tags")?;

    Ok(ToolRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        provider: row.try_get("provider")?,
        category: row.try_get("category")?,
        adapter_type: AdapterKind::parse(&adapter_type)
            .ok_or_else(|| anyhow::anyhow!("unknown adapter_type '{adapter_type}'"))?,
        enabled: row.try_get("enabled")?,
        mcp_server_url: row.try_get("mcp_server_url")?,
        openapi_url: row.try_get("openapi_url")?,
        base_url: row.try_get("base_url")?,
        operation_ids: serde_json::from_value(operation_ids).unwrap_or_default(),
        auth_config: row.try_get("auth_config")?,
        tags: serde_json::from_value(tags).unwrap_or_default(),
        credential_mode: CredentialMode::parse(&credential_mode)
            .ok_or_else(|| anyhow::anyhow!("unknown credential_mode '{credential_mode}'"))?,
        credential_id: row.try_get("credential_id")?,
        credential_name: row.try_get("credential_name")?,
        credential_environment: row.try_get("credential_environment")?,
        org_id: row.try_get("org_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl ToolStore for PgToolStore {
    async fn list_tools(&self, enabled_only: bool) -> anyhow::Result<Vec<ToolRecord>> {
        let query = if enabled_only {
            format!("SELECT {COLUMNS} FROM adapter_tools WHERE enabled = TRUE ORDER BY id")
        } else {
            format!("SELECT {COLUMNS} FROM adapter_tools ORDER BY id")
        };
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn get_tool(&self, id: i64) -> anyhow::Result<Option<ToolRecord>> {
        let query = format!("SELECT {COLUMNS} FROM adapter_tools WHERE id = $1");
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn create_tool(&self, tool: NewTool) -> anyhow::Result<ToolRecord> {
        let now = Utc::now();
        let query = format!(
            "INSERT INTO adapter_tools (
                name, description, provider, category, adapter_type, enabled,
                mcp_server_url, openapi_url, base_url, operation_ids, auth_config,
                tags, credential_mode, credential_id, credential_name,
                credential_environment, org_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&tool.name)
            .bind(&tool.description)
            .bind(&tool.provider)
            .bind(&tool.category)
            .bind(tool.adapter_type.as_str())
            .bind(tool.enabled)
            .bind(&tool.mcp_server_url)
            .bind(&tool.openapi_url)
            .bind(&tool.base_url)
            .bind(serde_json::json!(tool.operation_ids))
            .bind(&tool.auth_config)
            .bind(serde_json::json!(tool.tags))
            .bind(tool.credential_mode.as_str())
            .bind(tool.credential_id)
            .bind(&tool.credential_name)
            .bind(&tool.credential_environment)
            .bind(&tool.org_id)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        record_from_row(&row)
    }

    async fn update_tool(&self, id: i64, patch: ToolPatch) -> anyhow::Result<Option<ToolRecord>> {
        let Some(existing) = self.get_tool(id).await? else {
            return Ok(None);
        };
        let merged = merge_patch(existing, patch);

        let query = format!(
            "UPDATE adapter_tools SET
                name = $1, description = $2, provider = $3, category = $4,
                adapter_type = $5, enabled = $6, mcp_server_url = $7, openapi_url = $8,
                base_url = $9, operation_ids = $10, auth_config = $11, tags = $12,
                credential_mode = $13, credential_id = $14, credential_name = $15,
                credential_environment = $16, org_id = $17, updated_at = $18
            WHERE id = $19
            RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&merged.name)
            .bind(&merged.description)
            .bind(&merged.provider)
            .bind(&merged.category)
            .bind(merged.adapter_type.as_str())
            .bind(merged.enabled)
            .bind(&merged.mcp_server_url)
            .bind(&merged.openapi_url)
            .bind(&merged.base_url)
            .bind(serde_json::json!(merged.operation_ids))
            .bind(&merged.auth_config)
            .bind(serde_json::json!(merged.tags))
            .bind(merged.credential_mode.as_str())
            .bind(merged.credential_id)
            .bind(&merged.credential_name)
            .bind(&merged.credential_environment)
            .bind(&merged.org_id)
            .bind(Utc::now())
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        record_from_row(&row).map(Some)
    }

    async fn delete_tool(&self, id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM adapter_tools WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Apply a partial update over an existing record.
#[must_use]
pub fn merge_patch(existing: ToolRecord, patch: ToolPatch) -> ToolRecord {
    ToolRecord {
        id: existing.id,
        name: patch.name.unwrap_or(existing.name),
        description: patch.description.unwrap_or(existing.description),
        provider: patch.provider.unwrap_or(existing.provider),
        category: patch.category.unwrap_or(existing.category),
        adapter_type: patch.adapter_type.unwrap_or(existing.adapter_type),
        enabled: patch.enabled.unwrap_or(existing.enabled),
        mcp_server_url: patch.mcp_server_url.unwrap_or(existing.mcp_server_url),
        openapi_url: patch.openapi_url.unwrap_or(existing.openapi_url),
        base_url: patch.base_url.unwrap_or(existing.base_url),
        operation_ids: patch.operation_ids.unwrap_or(existing.operation_ids),
        auth_config: patch.auth_config.unwrap_or(existing.auth_config),
        tags: patch.tags.unwrap_or(existing.tags),
        credential_mode: patch.credential_mode.unwrap_or(existing.credential_mode),
        credential_id: patch.credential_id.unwrap_or(existing.credential_id),
        credential_name: patch.credential_name.unwrap_or(existing.credential_name),
        credential_environment: patch
            .credential_environment
            .unwrap_or(existing.credential_environment),
        org_id: patch.org_id.unwrap_or(existing.org_id),
        created_at: existing.created_at,
        updated_at: existing.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> ToolRecord {
        ToolRecord {
            id: 1,
            name: name.to_string(),
            description: "d".into(),
            provider: "github".into(),
            category: "dev".into(),
            adapter_type: AdapterKind::Rest,
            enabled: true,
            mcp_server_url: None,
            openapi_url: Some("https://example.com/openapi.json".into()),
            base_url: None,
            operation_ids: vec!["listRepos".into()],
            auth_config: serde_json::json!({}),
            tags: vec![],
            credential_mode: CredentialMode::Hosted,
            credential_id: Some(7),
            credential_name: None,
            credential_environment: "production".into(),
            org_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn merge_patch_keeps_absent_fields() {
        let merged = merge_patch(
            record("github"),
            ToolPatch {
                enabled: Some(false),
                ..ToolPatch::default()
            },
        );
        assert!(!merged.enabled);
        assert_eq!(merged.name, "github");
        assert_eq!(merged.operation_ids, vec!["listRepos".to_string()]);
    }

    #[test]
    fn merge_patch_can_null_optional_fields() {
        let merged = merge_patch(
            record("github"),
            ToolPatch {
                credential_id: Some(None),
                openapi_url: Some(None),
                ..ToolPatch::default()
            },
        );
        assert_eq!(merged.credential_id, None);
        assert_eq!(merged.openapi_url, None);
    }

    #[test]
    fn kind_round_trips_through_strings() {
        assert_eq!(AdapterKind::parse("rest"), Some(AdapterKind::Rest));
        assert_eq!(AdapterKind::parse("mcp"), Some(AdapterKind::Mcp));
        assert_eq!(AdapterKind::parse("grpc"), None);
        assert_eq!(CredentialMode::parse("byo"), Some(CredentialMode::Byo));
    }
}
