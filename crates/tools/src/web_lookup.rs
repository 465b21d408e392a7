//! External lookup tool.
//!
//! Instead of querying local data, this tool asks the completion service a
//! second, side-channel question with search augmentation on and tools off,
//! and hands back the answer text. To the round controller it is an ordinary
//! tool: its failures and timeouts surface as tool failures like any other.

use async_trait::async_trait;
use deskpilot_core::error::ToolError;
use deskpilot_core::message::Message;
use deskpilot_core::provider::{Provider, ProviderRequest};
use deskpilot_core::tool::{Tool, ToolContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const LOOKUP_INSTRUCTIONS: &str = "Answer the question using current information from the web. \
Be concise and factual, and mention the sources you relied on.";

pub struct WebLookupTool {
    provider: Arc<dyn Provider>,
    model: String,
    timeout: Duration,
}

impl WebLookupTool {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Tool for WebLookupTool {
    fn name(&self) -> &str {
        "web_lookup"
    }

    fn description(&self) -> &str {
        "Look something up on the public web (news, documentation, company information). \
         Use only when the answer is not in the dashboard's own records."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The question to research"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let query = arguments["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let mut request = ProviderRequest::new(
            &self.model,
            vec![Message::system(LOOKUP_INSTRUCTIONS), Message::user(query)],
        );
        request.search = true;

        debug!(session_id = %ctx.session_id, query, "Side-channel lookup");

        let response = tokio::time::timeout(self.timeout, self.provider.complete(request))
            .await
            .map_err(|_| {
                warn!(session_id = %ctx.session_id, "Lookup timed out");
                ToolError::Timeout {
                    tool_name: self.name().into(),
                    timeout_secs: self.timeout.as_secs(),
                }
            })?
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        Ok(serde_json::json!({ "answer": response.message.content }))
    }
}
