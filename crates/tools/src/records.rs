//! The dashboard's record store, as the tools see it.
//!
//! The real CRUD layer lives outside this workspace. Tools only need this
//! narrow surface, scoped by tenant on every call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deskpilot_core::error::ToolError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One business record (customer, order, ticket, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub name: String,

    /// Record type, e.g. "customer" or "order"
    pub kind: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Free-form attributes
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,

    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            tags: Vec::new(),
            fields: serde_json::Map::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Case-insensitive match against name, kind, and string field values.
    fn matches(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(needle)
            || self.kind.to_lowercase().contains(needle)
            || self
                .fields
                .values()
                .filter_map(|v| v.as_str())
                .any(|v| v.to_lowercase().contains(needle))
    }
}

/// Tenant-scoped access to business records.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Records matching a free-text query and optional tag, at most `limit`.
    async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        tag: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Record>, ToolError>;

    async fn get(&self, tenant_id: &str, id: &str) -> Result<Option<Record>, ToolError>;

    /// Merge `fields` into an existing record and return the updated record.
    async fn update(
        &self,
        tenant_id: &str,
        id: &str,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Record, ToolError>;
}

/// Records held in memory, keyed by tenant. Used by tests and the demo CLI.
#[derive(Default)]
pub struct InMemoryRecordSource {
    tenants: RwLock<HashMap<String, Vec<Record>>>,
}

impl InMemoryRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, tenant_id: &str, record: Record) {
        let mut tenants = self.tenants.write().await;
        let records = tenants.entry(tenant_id.to_string()).or_default();
        records.retain(|r| r.id != record.id);
        records.push(record);
    }

    /// A small dataset for the `demo` tenant.
    pub async fn with_demo_data() -> Self {
        let source = Self::new();
        let demo = [
            Record::new("cus-1001", "Northwind Traders", "customer")
                .with_tags(&["vip", "wholesale"])
                .with_field("region", serde_json::json!("EMEA"))
                .with_field("owner", serde_json::json!("dana")),
            Record::new("cus-1002", "Blue Harbor Cafe", "customer")
                .with_tags(&["retail"])
                .with_field("region", serde_json::json!("NA")),
            Record::new("cus-1003", "Kestrel Logistics", "customer")
                .with_tags(&["vip"])
                .with_field("region", serde_json::json!("APAC")),
            Record::new("ord-5001", "Order 5001", "order")
                .with_tags(&["open"])
                .with_field("customer_id", serde_json::json!("cus-1001"))
                .with_field("status", serde_json::json!("pending")),
        ];
        for record in demo {
            source.insert("demo", record).await;
        }
        source
    }
}

#[async_trait]
impl RecordSource for InMemoryRecordSource {
    async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        tag: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Record>, ToolError> {
        let needle = query.trim().to_lowercase();
        let tenants = self.tenants.read().await;
        Ok(tenants
            .get(tenant_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| tag.is_none_or(|t| r.tags.iter().any(|rt| rt == t)))
                    .filter(|r| r.matches(&needle))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, tenant_id: &str, id: &str) -> Result<Option<Record>, ToolError> {
        let tenants = self.tenants.read().await;
        Ok(tenants
            .get(tenant_id)
            .and_then(|records| records.iter().find(|r| r.id == id).cloned()))
    }

    async fn update(
        &self,
        tenant_id: &str,
        id: &str,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Record, ToolError> {
        let mut tenants = self.tenants.write().await;
        let record = tenants
            .get_mut(tenant_id)
            .and_then(|records| records.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| ToolError::ExecutionFailed {
                tool_name: "update_record".into(),
                reason: format!("Record {id} not found"),
            })?;

        record.fields.extend(fields);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}
