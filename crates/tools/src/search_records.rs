//! Record search tool: free-text and tag lookup over the tenant's records.

use crate::records::RecordSource;
use async_trait::async_trait;
use deskpilot_core::error::ToolError;
use deskpilot_core::tool::{Tool, ToolContext};
use std::sync::Arc;

const DEFAULT_LIMIT: u64 = 10;
const MAX_LIMIT: u64 = 50;

pub struct SearchRecordsTool {
    records: Arc<dyn RecordSource>,
}

impl SearchRecordsTool {
    pub fn new(records: Arc<dyn RecordSource>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for SearchRecordsTool {
    fn name(&self) -> &str {
        "search_records"
    }

    fn description(&self) -> &str {
        "Search the dashboard's records (customers, orders, tickets) by free text and/or tag. \
         Returns matching records with their ids, names, tags and fields."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Text to match against record names and fields (empty matches all)"
                },
                "tag": {
                    "type": "string",
                    "description": "Only return records carrying this tag"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of records (default 10, max 50)",
                    "default": 10
                }
            }
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let query = arguments["query"].as_str().unwrap_or_default();
        let tag = arguments["tag"].as_str().filter(|t| !t.is_empty());
        let limit = arguments["limit"]
            .as_u64()
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, MAX_LIMIT) as usize;

        let records = self
            .records
            .search(&ctx.tenant_id, query, tag, limit)
            .await?;

        Ok(serde_json::json!({
            "count": records.len(),
            "records": records,
        }))
    }
}
