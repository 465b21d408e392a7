//! The round controller: drives completion calls and tool dispatch for one
//! user turn until a final answer exists.
//!
//! ```text
//! AwaitingCompletion ──text──────────▶ Final
//!        │  ▲
//!   tool calls │  results appended, round += 1
//!        ▼  │
//!   ToolRequested ──round == max──▶ Exhausted ──forced finalizer──▶ Final
//! ```

use crate::completion::{CompletionClient, CompletionOutcome};
use crate::dispatch::ToolDispatcher;
use crate::log::MessageLog;
use crate::profile::AssistantProfile;
use chrono::Utc;
use deskpilot_core::error::{ProviderError, StoreError};
use deskpilot_core::event::{DomainEvent, EventBus};
use deskpilot_core::message::Message;
use deskpilot_core::tool::ToolContext;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default round budget per user turn.
pub const MAX_ROUNDS: u32 = 6;

/// Directive appended when the round budget runs out.
pub const FINALIZE_DIRECTIVE: &str = "You have used all available tool rounds. Summarize what you \
have gathered so far and answer the question now. Do not call any more tools.";

/// Last-resort answer so the caller never receives empty text.
pub const APOLOGY: &str = "Sorry, I wasn't able to put together an answer this time. \
Please try again or rephrase your question.";

/// Where the controller is in a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    AwaitingCompletion,
    ToolRequested,
    Final,
    Exhausted,
}

/// The result of one turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub answer: String,
    /// Tool rounds completed, never more than the budget.
    pub rounds: u32,
    pub tool_calls: usize,
    /// The forced finalizer produced the answer.
    pub finalized: bool,
    /// The first completion failed and the no-tools retry answered.
    pub fell_back: bool,
}

/// Failures that end a turn without an answer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Message store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Completion service failed on round {round}: {source}")]
    Service { round: u32, source: ProviderError },
}

impl EngineError {
    /// HTTP-style status for the caller.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Store(_) => 503,
            Self::Service { source, .. } if source.is_timeout() => 504,
            Self::Service { .. } => 502,
        }
    }
}

/// The shared tool-calling engine. Assistant-specific prompt and tools are
/// passed in per turn through an [`AssistantProfile`].
pub struct RoundController {
    client: CompletionClient,
    dispatcher: ToolDispatcher,
    max_rounds: u32,
    events: Arc<EventBus>,
}

impl RoundController {
    pub fn new(client: CompletionClient, dispatcher: ToolDispatcher, events: Arc<EventBus>) -> Self {
        Self {
            client,
            dispatcher,
            max_rounds: MAX_ROUNDS,
            events,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Run the turn whose user message is already the last entry of `log`.
    ///
    /// Entries appended before a failure stay in the log.
    pub async fn run(
        &self,
        profile: &AssistantProfile,
        log: &mut MessageLog,
    ) -> Result<TurnOutcome, EngineError> {
        let session_id = log.key().session_id.clone();
        let ctx = ToolContext::from(log.key());
        let definitions = profile.tools.definitions();

        let mut state = RoundState::AwaitingCompletion;
        let mut round: u32 = 0;
        let mut tool_calls = 0usize;
        let mut fell_back = false;
        let mut finalized = false;
        let mut answer = String::new();
        let mut pending = Vec::new();

        loop {
            state = match state {
                RoundState::AwaitingCompletion => {
                    if round >= self.max_rounds {
                        RoundState::Exhausted
                    } else {
                        debug!(session_id = %session_id, round = round + 1, "Requesting completion");
                        let outcome = self
                            .client
                            .complete(log.messages(), definitions.clone())
                            .await;
                        self.completion_finished(&session_id, round + 1, &outcome);

                        match outcome {
                            CompletionOutcome::FinalAnswer(text) => {
                                answer = text;
                                RoundState::Final
                            }
                            CompletionOutcome::ToolRequested { content, calls } => {
                                log.append(Message::assistant_tool_request(content, calls.clone()))
                                    .await?;
                                pending = calls;
                                RoundState::ToolRequested
                            }
                            CompletionOutcome::ServiceError(e) if round == 0 => {
                                answer = self.fall_back(log, e).await?;
                                fell_back = true;
                                RoundState::Final
                            }
                            CompletionOutcome::ServiceError(e) => {
                                return Err(self.fail(&session_id, round + 1, e));
                            }
                        }
                    }
                }
                RoundState::ToolRequested => {
                    let calls = std::mem::take(&mut pending);
                    let results = self.dispatcher.dispatch(&profile.tools, &calls, &ctx).await;
                    for result in results {
                        log.append(Message::tool_result(result.tool_call_id, result.content))
                            .await?;
                    }
                    tool_calls += calls.len();
                    round += 1;
                    RoundState::AwaitingCompletion
                }
                RoundState::Exhausted => {
                    warn!(session_id = %session_id, rounds = round, "Round budget exhausted, forcing an answer");
                    self.events.publish(DomainEvent::RoundsExhausted {
                        session_id: session_id.clone(),
                        rounds: round,
                        timestamp: Utc::now(),
                    });
                    answer = self.finalize(log).await?;
                    finalized = true;
                    RoundState::Final
                }
                RoundState::Final => break,
            };
        }

        if answer.trim().is_empty() {
            answer = APOLOGY.to_string();
        }
        log.append(Message::assistant(answer.clone())).await?;

        info!(session_id = %session_id, rounds = round, tool_calls, finalized, fell_back, "Turn answered");

        Ok(TurnOutcome {
            answer,
            rounds: round,
            tool_calls,
            finalized,
            fell_back,
        })
    }

    /// One retry after a first-round failure: no tools, search enabled.
    /// A second failure ends the turn.
    async fn fall_back(
        &self,
        log: &MessageLog,
        first: ProviderError,
    ) -> Result<String, EngineError> {
        let session_id = &log.key().session_id;
        warn!(session_id = %session_id, error = %first, "First completion failed, retrying without tools");
        self.events.publish(DomainEvent::FallbackUsed {
            session_id: session_id.to_string(),
            reason: first.to_string(),
            timestamp: Utc::now(),
        });

        let outcome = self.client.complete_with_search(log.messages()).await;
        self.completion_finished(session_id, 1, &outcome);

        match outcome {
            CompletionOutcome::FinalAnswer(text) => Ok(text),
            // Tools were not offered; any calls the model makes anyway are dropped.
            CompletionOutcome::ToolRequested { content, .. } => Ok(content),
            CompletionOutcome::ServiceError(e) => Err(self.fail(session_id, 1, e)),
        }
    }

    /// Forced finalization: a synthetic directive and one tool-less call.
    /// Never fails on the service side; the apology covers that.
    async fn finalize(&self, log: &mut MessageLog) -> Result<String, EngineError> {
        log.append(
            Message::user(FINALIZE_DIRECTIVE).with_metadata("synthetic", serde_json::json!(true)),
        )
        .await?;

        let outcome = self.client.complete(log.messages(), Vec::new()).await;
        self.completion_finished(&log.key().session_id, self.max_rounds + 1, &outcome);

        Ok(match outcome {
            CompletionOutcome::FinalAnswer(text) if !text.trim().is_empty() => text,
            CompletionOutcome::ToolRequested { content, .. } if !content.trim().is_empty() => {
                content
            }
            CompletionOutcome::ServiceError(e) => {
                warn!(session_id = %log.key().session_id, error = %e, "Forced finalization failed, apologizing");
                APOLOGY.to_string()
            }
            _ => APOLOGY.to_string(),
        })
    }

    fn fail(&self, session_id: &str, round: u32, source: ProviderError) -> EngineError {
        warn!(session_id = %session_id, round, error = %source, "Completion failed mid-turn");
        EngineError::Service { round, source }
    }

    fn completion_finished(&self, session_id: &str, round: u32, outcome: &CompletionOutcome) {
        let tool_calls = match outcome {
            CompletionOutcome::ToolRequested { calls, .. } => calls.len(),
            _ => 0,
        };
        self.events.publish(DomainEvent::CompletionFinished {
            session_id: session_id.to_string(),
            round,
            model: self.client.model().to_string(),
            outcome: outcome.kind().to_string(),
            tool_calls,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, Step, tool_call};
    use async_trait::async_trait;
    use deskpilot_core::error::ToolError;
    use deskpilot_core::message::{Role, SessionKey};
    use deskpilot_core::provider::Provider;
    use deskpilot_core::store::MessageStore;
    use deskpilot_core::tool::{Tool, ToolRegistry};
    use deskpilot_store::InMemoryStore;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the arguments back"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(serde_json::json!({ "echo": arguments }))
        }
    }

    fn profile() -> AssistantProfile {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        AssistantProfile::new("ops", "You are a test assistant.", registry)
    }

    fn controller(provider: Arc<ScriptedProvider>) -> RoundController {
        let events = Arc::new(EventBus::default());
        let provider: Arc<dyn Provider> = provider;
        RoundController::new(
            CompletionClient::new(provider, "mock-model"),
            ToolDispatcher::new(events.clone()),
            events,
        )
    }

    async fn log_with(text: &str) -> (Arc<InMemoryStore>, MessageLog) {
        let store = Arc::new(InMemoryStore::new());
        let mut log = MessageLog::load(
            store.clone(),
            SessionKey::new("acme", "u1", "s1"),
            Some("You are a test assistant."),
        )
        .await
        .unwrap();
        log.append(Message::user(text)).await.unwrap();
        (store, log)
    }

    /// Every assistant tool request is followed by exactly one linked result per call.
    fn assert_results_linked(history: &[Message]) {
        for (i, message) in history.iter().enumerate() {
            if message.role == Role::Assistant && !message.tool_calls.is_empty() {
                let results = &history[i + 1..i + 1 + message.tool_calls.len()];
                for (call, result) in message.tool_calls.iter().zip(results) {
                    assert_eq!(result.role, Role::Tool);
                    assert_eq!(result.tool_call_id.as_deref(), Some(call.id.as_str()));
                }
            }
        }
        let issued: usize = history.iter().map(|m| m.tool_calls.len()).sum();
        let answered = history.iter().filter(|m| m.role == Role::Tool).count();
        assert_eq!(issued, answered);
    }

    #[tokio::test]
    async fn plain_answer_takes_no_rounds() {
        let provider = Arc::new(ScriptedProvider::new(vec![Step::text("All good.")]));
        let (_, mut log) = log_with("status?").await;

        let outcome = controller(provider.clone())
            .run(&profile(), &mut log)
            .await
            .unwrap();

        assert_eq!(outcome.answer, "All good.");
        assert_eq!(outcome.rounds, 0);
        assert!(!outcome.finalized);
        assert_eq!(log.history().last().unwrap().content, "All good.");
        assert_eq!(provider.requests()[0].tools.len(), 1);
        assert_eq!(provider.requests()[0].messages[0].role, Role::System);
    }

    #[tokio::test]
    async fn tool_round_appends_request_and_results_in_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Step::tools(vec![
                tool_call("c1", "echo", serde_json::json!({"n": 1})),
                tool_call("c2", "echo", serde_json::json!({"n": 2})),
            ]),
            Step::text("done"),
        ]));
        let (store, mut log) = log_with("echo twice").await;

        let outcome = controller(provider).run(&profile(), &mut log).await.unwrap();
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.tool_calls, 2);

        let persisted = store.list(log.key()).await.unwrap();
        let roles: Vec<Role> = persisted.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
        );
        assert_eq!(persisted[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(persisted[3].tool_call_id.as_deref(), Some("c2"));
        assert_results_linked(&persisted);
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_do_not_abort() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Step::tools(vec![
                tool_call("c1", "nope", serde_json::json!({})),
                deskpilot_core::message::MessageToolCall {
                    id: "c2".into(),
                    name: "echo".into(),
                    arguments: "{not json".into(),
                },
            ]),
            Step::text("recovered"),
        ]));
        let (_, mut log) = log_with("try it").await;

        let outcome = controller(provider.clone())
            .run(&profile(), &mut log)
            .await
            .unwrap();
        assert_eq!(outcome.answer, "recovered");

        let history = log.history();
        let unknown: serde_json::Value = serde_json::from_str(&history[2].content).unwrap();
        assert!(unknown.get("error").is_some());
        let echoed: serde_json::Value = serde_json::from_str(&history[3].content).unwrap();
        assert_eq!(echoed["echo"], serde_json::json!({}));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn endless_tool_requests_are_finalized_after_budget() {
        let provider = Arc::new(
            ScriptedProvider::new(Vec::new())
                .then_forever(Step::tools(vec![tool_call("c", "echo", serde_json::json!({}))])),
        );
        // The finalizer call is tool-less, so the mock keeps asking for tools; the
        // request content is ignored and the apology is returned.
        let (_, mut log) = log_with("loop forever").await;

        let outcome = controller(provider.clone())
            .run(&profile(), &mut log)
            .await
            .unwrap();

        assert_eq!(outcome.rounds, MAX_ROUNDS);
        assert!(outcome.finalized);
        assert_eq!(outcome.answer, APOLOGY);
        assert_eq!(provider.call_count(), MAX_ROUNDS as usize + 1);

        let last_request = provider.requests().pop().unwrap();
        assert!(last_request.tools.is_empty());
        let directive = last_request.messages.last().unwrap();
        assert_eq!(directive.role, Role::User);
        assert_eq!(directive.content, FINALIZE_DIRECTIVE);
        assert_results_linked(log.history());
    }

    #[tokio::test]
    async fn finalizer_answer_is_returned() {
        let mut steps: Vec<Step> = (0..3)
            .map(|i| Step::tools(vec![tool_call(&format!("c{i}"), "echo", serde_json::json!({}))]))
            .collect();
        steps.push(Step::text("Here is what I found."));
        let provider = Arc::new(ScriptedProvider::new(steps));
        let (_, mut log) = log_with("dig").await;

        let outcome = controller(provider)
            .with_max_rounds(3)
            .run(&profile(), &mut log)
            .await
            .unwrap();
        assert!(outcome.finalized);
        assert_eq!(outcome.rounds, 3);
        assert_eq!(outcome.answer, "Here is what I found.");

        let synthetic = log
            .history()
            .iter()
            .filter(|m| m.metadata.get("synthetic").is_some())
            .count();
        assert_eq!(synthetic, 1);
    }

    #[tokio::test]
    async fn finalizer_failure_yields_apology() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Step::tools(vec![tool_call("c1", "echo", serde_json::json!({}))]),
            Step::fail(500),
        ]));
        let (_, mut log) = log_with("dig").await;

        let outcome = controller(provider)
            .with_max_rounds(1)
            .run(&profile(), &mut log)
            .await
            .unwrap();
        assert_eq!(outcome.answer, APOLOGY);
    }

    #[tokio::test]
    async fn first_round_failure_falls_back_once() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Step::fail(503),
            Step::text("Answer without tools."),
        ]));
        let (_, mut log) = log_with("hello").await;

        let outcome = controller(provider.clone())
            .run(&profile(), &mut log)
            .await
            .unwrap();
        assert!(outcome.fell_back);
        assert_eq!(outcome.answer, "Answer without tools.");

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].tools.is_empty());
        assert!(requests[1].search);
    }

    #[tokio::test]
    async fn failed_fallback_is_a_service_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![Step::fail(500), Step::fail(500)]));
        let (_, mut log) = log_with("hello").await;

        let err = controller(provider.clone())
            .run(&profile(), &mut log)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Service { round: 1, .. }));
        assert_eq!(err.status_code(), 502);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn later_round_failure_keeps_partial_progress() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Step::tools(vec![tool_call("c1", "echo", serde_json::json!({}))]),
            Step::fail(500),
        ]));
        let (store, mut log) = log_with("hello").await;

        let err = controller(provider.clone())
            .run(&profile(), &mut log)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Service { round: 2, .. }));
        // No retry on later rounds.
        assert_eq!(provider.call_count(), 2);

        let persisted = store.list(log.key()).await.unwrap();
        assert_eq!(persisted.len(), 3);
        assert_eq!(persisted[2].role, Role::Tool);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure_and_maps_to_504() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Step::tools(vec![tool_call("c1", "echo", serde_json::json!({}))]),
            Step::stall(),
        ]));
        let (_, mut log) = log_with("hello").await;

        let err = controller(provider)
            .run(&profile(), &mut log)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 504);
    }

    #[tokio::test]
    async fn empty_answer_becomes_apology() {
        let provider = Arc::new(ScriptedProvider::new(vec![Step::text("   ")]));
        let (_, mut log) = log_with("hello").await;

        let outcome = controller(provider).run(&profile(), &mut log).await.unwrap();
        assert_eq!(outcome.answer, APOLOGY);
    }

    #[tokio::test]
    async fn publishes_completion_events() {
        let provider = Arc::new(ScriptedProvider::new(vec![Step::fail(500), Step::text("ok")]));
        let events = Arc::new(EventBus::default());
        let mut rx = events.subscribe();
        let dyn_provider: Arc<dyn Provider> = provider;
        let controller = RoundController::new(
            CompletionClient::new(dyn_provider, "mock-model"),
            ToolDispatcher::new(events.clone()),
            events,
        );
        let (_, mut log) = log_with("hello").await;
        controller.run(&profile(), &mut log).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event.as_ref() {
                DomainEvent::CompletionFinished { outcome, .. } => outcome.clone(),
                DomainEvent::FallbackUsed { .. } => "fallback".to_string(),
                other => format!("{other:?}"),
            });
        }
        assert_eq!(kinds, vec!["service_error", "fallback", "final"]);
    }
}
