//! The `AuditStore` trait — the append/query surface every backend
//! implements — plus the backend factory.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use mg_domain::Result;

use crate::record::ToolRollup;

/// Logical collection names.
pub mod collections {
    pub const TOOL_LOGS: &str = "tool_logs";
    pub const GOVERNANCE_LOGS: &str = "governance_logs";
    pub const SERVERS: &str = "servers";
    pub const SERVER_TOOLS: &str = "server_tools";
    pub const GOVERNANCE_CONFIGS: &str = "governance_configs";
    pub const SERVER_POLICIES: &str = "server_policies";
    pub const DEPLOYMENTS: &str = "deployments";
}

/// A simple conjunctive query over string fields, with an optional
/// timestamp range, sort, and limit. Timestamps are the fixed-width
/// RFC 3339 strings produced by [`crate::record::iso`], so range filters
/// and sorts are plain string comparisons on every backend.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub equals: Vec<(String, String)>,
    pub not_equals: Vec<(String, String)>,
    /// Inclusive `[from, to]` filter on the `timestamp` field.
    pub time_range: Option<(String, String)>,
    pub sort_desc_by: Option<String>,
    pub sort_asc_by: Option<String>,
    pub limit: Option<usize>,
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<String>) -> Self {
        self.equals.push((field.to_string(), value.into()));
        self
    }

    pub fn ne(mut self, field: &str, value: impl Into<String>) -> Self {
        self.not_equals.push((field.to_string(), value.into()));
        self
    }

    pub fn between(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.time_range = Some((from.into(), to.into()));
        self
    }

    pub fn sort_desc(mut self, field: &str) -> Self {
        self.sort_desc_by = Some(field.to_string());
        self
    }

    pub fn sort_asc(mut self, field: &str) -> Self {
        self.sort_asc_by = Some(field.to_string());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Backend storage for audit documents.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Backend name for logs and the status endpoint.
    fn backend(&self) -> &'static str;

    /// Append one document.
    async fn insert(&self, collection: &str, document: Value) -> Result<()>;

    /// Replace the document matching all `key` fields, inserting if absent.
    async fn upsert(&self, collection: &str, key: &[(&str, &str)], document: Value) -> Result<()>;

    /// Query documents.
    async fn find(&self, collection: &str, query: FindQuery) -> Result<Vec<Value>>;

    /// Per-tool completion rollups within `[from, to]`, optionally
    /// filtered by server, sorted by call volume descending.
    async fn tool_analytics(
        &self,
        server_name: Option<&str>,
        from: &str,
        to: &str,
    ) -> Result<Vec<ToolRollup>>;

    /// Best-effort flush of buffered writes.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// URI value (and scheme) selecting the in-memory backend.
pub const MEMORY_URI: &str = "memory";

/// Build a store for the configured URI: `"memory"` selects the in-memory
/// backend, anything else is treated as a MongoDB connection string.
pub async fn create_store(uri: &str, database: &str) -> Result<Arc<dyn AuditStore>> {
    if uri == MEMORY_URI || uri.starts_with("memory:") {
        tracing::info!("using in-memory audit store");
        Ok(Arc::new(crate::memory::MemoryAuditStore::new()))
    } else {
        let store = crate::mongo::MongoAuditStore::connect(uri, database).await?;
        Ok(Arc::new(store))
    }
}
