//! Tool dispatch for one round.

use chrono::Utc;
use deskpilot_core::error::ToolError;
use deskpilot_core::event::{DomainEvent, EventBus};
use deskpilot_core::message::MessageToolCall;
use deskpilot_core::tool::{ToolCall, ToolContext, ToolOutcome, ToolRegistry, ToolResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Executes the tool calls of one round against a registry.
///
/// Returns exactly one [`ToolResult`] per call, in call order, whether the
/// calls ran one after another or concurrently. Unknown tools, handler
/// errors and timeouts all come back as error payloads.
pub struct ToolDispatcher {
    timeout: Duration,
    parallel: bool,
    events: Arc<EventBus>,
}

impl ToolDispatcher {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            timeout: Duration::from_secs(30),
            parallel: true,
            events,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub async fn dispatch(
        &self,
        registry: &ToolRegistry,
        calls: &[MessageToolCall],
        ctx: &ToolContext,
    ) -> Vec<ToolResult> {
        if self.parallel && calls.len() > 1 {
            debug!(count = calls.len(), "Dispatching tool calls concurrently");
            // join_all yields in input order regardless of completion order
            futures::future::join_all(calls.iter().map(|call| self.run_one(registry, call, ctx)))
                .await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.run_one(registry, call, ctx).await);
            }
            results
        }
    }

    async fn run_one(
        &self,
        registry: &ToolRegistry,
        call: &MessageToolCall,
        ctx: &ToolContext,
    ) -> ToolResult {
        let call = ToolCall::from_message(call);
        let start = Instant::now();

        let outcome = match tokio::time::timeout(self.timeout, registry.execute(&call, ctx)).await
        {
            Ok(outcome) => outcome,
            Err(_) => ToolOutcome::Failure(
                ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_secs: self.timeout.as_secs(),
                }
                .to_string(),
            ),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            ToolOutcome::Success(_) => {
                debug!(session_id = %ctx.session_id, tool = %call.name, duration_ms, "Tool succeeded")
            }
            ToolOutcome::Failure(reason) => {
                warn!(session_id = %ctx.session_id, tool = %call.name, duration_ms, reason = %reason, "Tool failed")
            }
        }

        self.events.publish(DomainEvent::ToolExecuted {
            session_id: ctx.session_id.clone(),
            tool_name: call.name.clone(),
            success: outcome.is_success(),
            duration_ms,
            timestamp: Utc::now(),
        });

        ToolResult::from_outcome(call.id, &outcome)
    }
}
