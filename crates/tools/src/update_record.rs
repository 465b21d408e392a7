//! Record mutation tool.

use crate::records::RecordSource;
use async_trait::async_trait;
use deskpilot_core::error::ToolError;
use deskpilot_core::tool::{Tool, ToolContext};
use std::sync::Arc;
use tracing::info;

pub struct UpdateRecordTool {
    records: Arc<dyn RecordSource>,
}

impl UpdateRecordTool {
    pub fn new(records: Arc<dyn RecordSource>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for UpdateRecordTool {
    fn name(&self) -> &str {
        "update_record"
    }

    fn description(&self) -> &str {
        "Change fields on an existing record. Only the given fields are modified."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "The record id"
                },
                "fields": {
                    "type": "object",
                    "description": "Field names and their new values"
                }
            },
            "required": ["id", "fields"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let id = arguments["id"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'id' argument".into()))?;
        let fields = arguments["fields"]
            .as_object()
            .filter(|f| !f.is_empty())
            .cloned()
            .ok_or_else(|| {
                ToolError::InvalidArguments("'fields' must be a non-empty object".into())
            })?;

        let changed: Vec<String> = fields.keys().cloned().collect();
        let record = self.records.update(&ctx.tenant_id, id, fields).await?;

        info!(
            tenant = %ctx.tenant_id,
            user = %ctx.user_id,
            record = %id,
            fields = ?changed,
            "Record updated by assistant"
        );

        Ok(serde_json::json!({ "updated": record }))
    }
}
