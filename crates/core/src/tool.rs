//! Tool trait: the abstraction over assistant capabilities.
//!
//! Tools are what let the completion service act on the dashboard's data:
//! look records up, change them, or consult an external source.
//! Execution is always local to the engine; the model only asks.

use crate::error::ToolError;
use crate::message::{MessageToolCall, SessionKey};
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// A request to execute a tool, with its arguments already parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Parse the raw arguments the service produced.
    ///
    /// Malformed or non-object JSON degrades to an empty object instead of
    /// failing the round.
    pub fn from_message(call: &MessageToolCall) -> Self {
        let arguments = if call.arguments.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            match serde_json::from_str::<serde_json::Value>(&call.arguments) {
                Ok(value @ serde_json::Value::Object(_)) => value,
                Ok(other) => {
                    warn!(tool = %call.name, kind = ?other, "Tool arguments are not an object, using {{}}");
                    serde_json::Value::Object(serde_json::Map::new())
                }
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Malformed tool arguments, using {{}}");
                    serde_json::Value::Object(serde_json::Map::new())
                }
            }
        };

        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        }
    }
}

/// Read-only context handed to every tool handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContext {
    pub tenant_id: String,
    pub user_id: String,
    pub session_id: String,
}

impl From<&SessionKey> for ToolContext {
    fn from(key: &SessionKey) -> Self {
        Self {
            tenant_id: key.tenant_id.clone(),
            user_id: key.user_id.clone(),
            session_id: key.session_id.clone(),
        }
    }
}

/// What one tool invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(serde_json::Value),
    Failure(String),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The payload that goes back to the model.
    ///
    /// Failures become `{"error": "..."}` so every call still gets a result.
    pub fn to_content(&self) -> String {
        match self {
            Self::Success(value) => {
                serde_json::to_string(value).unwrap_or_else(|e| error_payload(&e.to_string()))
            }
            Self::Failure(reason) => error_payload(reason),
        }
    }
}

impl From<std::result::Result<serde_json::Value, ToolError>> for ToolOutcome {
    fn from(result: std::result::Result<serde_json::Value, ToolError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(e) => Self::Failure(e.to_string()),
        }
    }
}

fn error_payload(reason: &str) -> String {
    serde_json::json!({ "error": reason }).to_string()
}

/// The result message content for one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub tool_call_id: String,

    /// Serialized payload, always valid JSON
    pub content: String,

    /// Whether the handler succeeded
    pub success: bool,
}

impl ToolResult {
    pub fn from_outcome(tool_call_id: impl Into<String>, outcome: &ToolOutcome) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: outcome.to_content(),
            success: outcome.is_success(),
        }
    }
}

/// The core Tool trait.
///
/// Each capability implements this and is registered in a [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "search_records").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, ordered by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// A registry restricted to the named tools. An empty list keeps everything.
    pub fn subset(&self, names: &[String]) -> Self {
        if names.is_empty() {
            return self.clone();
        }
        let tools = self
            .tools
            .iter()
            .filter(|(name, _)| names.iter().any(|n| n == *name))
            .map(|(name, tool)| (name.clone(), tool.clone()))
            .collect();
        Self { tools }
    }

    /// Execute a tool call. Never fails: unknown tools and handler errors
    /// come back as [`ToolOutcome::Failure`].
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutcome {
        match self.tools.get(&call.name) {
            Some(tool) => tool.execute(call.arguments.clone(), ctx).await.into(),
            None => ToolOutcome::Failure(ToolError::NotFound(call.name.clone()).to_string()),
        }
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
            ctx: &ToolContext,
        ) -> std::result::Result<serde_json::Value, ToolError> {
            let text = arguments["text"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("missing 'text'".into()))?;
            Ok(serde_json::json!({ "text": text, "tenant": ctx.tenant_id }))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::from(&SessionKey::new("acme", "u1", "s1"))
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = registry();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.definitions()[0].name, "echo");
    }

    #[test]
    fn subset_filters_by_name() {
        let registry = registry();
        assert_eq!(registry.subset(&[]).len(), 1);
        assert!(registry.subset(&["other".into()]).is_empty());
        assert_eq!(registry.subset(&["echo".into()]).names(), vec!["echo"]);
    }

    #[tokio::test]
    async fn registry_execute_tool() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            arguments: serde_json::json!({"text": "hello world"}),
        };
        let outcome = registry().execute(&call, &ctx()).await;
        assert_eq!(
            outcome,
            ToolOutcome::Success(serde_json::json!({"text": "hello world", "tenant": "acme"}))
        );
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failure_not_a_panic() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "nonexistent".into(),
            arguments: serde_json::json!({}),
        };
        let outcome = registry().execute(&call, &ctx()).await;
        let content: serde_json::Value = serde_json::from_str(&outcome.to_content()).unwrap();
        assert!(content["error"].as_str().unwrap().contains("nonexistent"));
    }

    #[tokio::test]
    async fn handler_error_becomes_error_payload() {
        let call = ToolCall {
            id: "call_2".into(),
            name: "echo".into(),
            arguments: serde_json::json!({}),
        };
        let result = ToolResult::from_outcome("call_2", &registry().execute(&call, &ctx()).await);
        assert!(!result.success);
        let content: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert!(content.get("error").is_some());
    }

    #[test]
    fn malformed_arguments_default_to_empty_object() {
        let call = ToolCall::from_message(&MessageToolCall {
            id: "c".into(),
            name: "echo".into(),
            arguments: "{not json".into(),
        });
        assert_eq!(call.arguments, serde_json::json!({}));

        let call = ToolCall::from_message(&MessageToolCall {
            id: "c".into(),
            name: "echo".into(),
            arguments: "[1,2]".into(),
        });
        assert_eq!(call.arguments, serde_json::json!({}));

        let call = ToolCall::from_message(&MessageToolCall {
            id: "c".into(),
            name: "echo".into(),
            arguments: r#"{"text":"x"}"#.into(),
        });
        assert_eq!(call.arguments["text"], "x");
    }
}
