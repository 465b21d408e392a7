//! Fetch a single record by id.

use crate::records::RecordSource;
use async_trait::async_trait;
use deskpilot_core::error::ToolError;
use deskpilot_core::tool::{Tool, ToolContext};
use std::sync::Arc;

pub struct GetRecordTool {
    records: Arc<dyn RecordSource>,
}

impl GetRecordTool {
    pub fn new(records: Arc<dyn RecordSource>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for GetRecordTool {
    fn name(&self) -> &str {
        "get_record"
    }

    fn description(&self) -> &str {
        "Fetch one record by its id, including all of its fields."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "The record id, e.g. cus-1001"
                }
            },
            "required": ["id"]
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

        let record = self
            .records
            .get(&ctx.tenant_id, id)
            .await?
            .ok_or_else(|| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("Record {id} not found"),
            })?;

        serde_json::to_value(record).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::InMemoryRecordSource;

    fn ctx() -> ToolContext {
        ToolContext {
            tenant_id: "demo".into(),
            user_id: "u1".into(),
            session_id: "s1".into(),
        }
    }

    #[tokio::test]
    async fn returns_record() {
        let tool = GetRecordTool::new(Arc::new(InMemoryRecordSource::with_demo_data().await));
        let record = tool
            .execute(serde_json::json!({"id": "ord-5001"}), &ctx())
            .await
            .unwrap();
        assert_eq!(record["fields"]["customer_id"], "cus-1001");
    }

    #[tokio::test]
    async fn missing_id_argument() {
        let tool = GetRecordTool::new(Arc::new(InMemoryRecordSource::new()));
        let err = tool.execute(serde_json::json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn unknown_record() {
        let tool = GetRecordTool::new(Arc::new(InMemoryRecordSource::new()));
        let err = tool
            .execute(serde_json::json!({"id": "cus-9"}), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cus-9"));
    }
}
