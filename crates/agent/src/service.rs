//! `submit_turn`: the inbound operation that ties the log, the engine and
//! the relay together for one assistant.

use crate::completion::CompletionClient;
use crate::dispatch::ToolDispatcher;
use crate::engine::{EngineError, RoundController, TurnOutcome};
use crate::log::MessageLog;
use crate::profile::AssistantProfile;
use crate::relay::StreamingRelay;
use crate::stream_event::TurnEvent;
use chrono::Utc;
use deskpilot_config::AppConfig;
use deskpilot_core::error::StoreError;
use deskpilot_core::event::{DomainEvent, EventBus};
use deskpilot_core::message::{Message, SessionKey, SessionSummary};
use deskpilot_core::provider::Provider;
use deskpilot_core::store::MessageStore;
use deskpilot_core::tool::ToolRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

/// Why a turn was rejected or failed before any streaming began.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("Unknown assistant: {0}")]
    UnknownAssistant(String),

    #[error("Message must not be empty")]
    EmptyMessage,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl TurnError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownAssistant(_) => 404,
            Self::EmptyMessage => 400,
            Self::Engine(e) => e.status_code(),
        }
    }
}

impl From<StoreError> for TurnError {
    fn from(e: StoreError) -> Self {
        Self::Engine(EngineError::Store(e))
    }
}

/// A finished turn, ready to be relayed.
pub struct TurnReply {
    pub outcome: TurnOutcome,
    /// Chunk events followed by exactly one `Done`.
    pub events: ReceiverStream<TurnEvent>,
}

/// Serves turns for every configured assistant over one shared engine.
pub struct ChatService {
    store: Arc<dyn MessageStore>,
    controller: RoundController,
    relay: StreamingRelay,
    assistants: BTreeMap<String, AssistantProfile>,
    events: Arc<EventBus>,
    title_max_chars: usize,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        controller: RoundController,
        relay: StreamingRelay,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            controller,
            relay,
            assistants: BTreeMap::new(),
            events,
            title_max_chars: 50,
        }
    }

    pub fn with_assistant(mut self, profile: AssistantProfile) -> Self {
        self.assistants.insert(profile.name.clone(), profile);
        self
    }

    pub fn with_title_max_chars(mut self, max: usize) -> Self {
        self.title_max_chars = max;
        self
    }

    /// Wire the engine from configuration. `registry` holds every available
    /// tool; each assistant gets the subset its config names.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        store: Arc<dyn MessageStore>,
        registry: &ToolRegistry,
        events: Arc<EventBus>,
    ) -> Self {
        let engine = &config.engine;
        let client = CompletionClient::new(provider, &config.default_model)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_timeout(Duration::from_secs(engine.completion_timeout_secs))
            .with_stream_upstream(engine.stream_upstream);
        let dispatcher = ToolDispatcher::new(events.clone())
            .with_timeout(Duration::from_secs(engine.tool_timeout_secs))
            .with_parallel(engine.parallel_tools);
        let controller = RoundController::new(client, dispatcher, events.clone())
            .with_max_rounds(engine.max_rounds);
        let relay = StreamingRelay::from_config(&config.relay);

        let mut service = Self::new(store, controller, relay, events)
            .with_title_max_chars(engine.title_max_chars);
        for (name, assistant) in &config.assistants {
            let profile = AssistantProfile::from_config(name, assistant, registry);
            service = service.with_assistant(profile);
        }
        service
    }

    pub fn assistant(&self, name: &str) -> Option<&AssistantProfile> {
        self.assistants.get(name)
    }

    pub fn assistants(&self) -> impl Iterator<Item = &AssistantProfile> {
        self.assistants.values()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Accept a user turn, run the engine to a final answer and hand back
    /// the relay stream for it.
    ///
    /// Every error is returned before the stream exists, so a caller never
    /// sees a partial stream.
    pub async fn submit_turn(
        &self,
        assistant: &str,
        key: &SessionKey,
        text: &str,
    ) -> Result<TurnReply, TurnError> {
        let outcome = self.run_turn(assistant, key, text).await?;
        let events = self.relay.relay(outcome.answer.clone());
        Ok(TurnReply { outcome, events })
    }

    /// Like [`submit_turn`](Self::submit_turn) without the relay.
    pub async fn run_turn(
        &self,
        assistant: &str,
        key: &SessionKey,
        text: &str,
    ) -> Result<TurnOutcome, TurnError> {
        let profile = self
            .assistants
            .get(assistant)
            .ok_or_else(|| TurnError::UnknownAssistant(assistant.to_string()))?;
        if text.trim().is_empty() {
            return Err(TurnError::EmptyMessage);
        }

        info!(session_id = %key.session_id, tenant = %key.tenant_id, assistant, "Turn started");
        self.events.publish(DomainEvent::TurnStarted {
            session_id: key.session_id.clone(),
            assistant: assistant.to_string(),
            timestamp: Utc::now(),
        });

        let result = self.run_profile(profile, key, text).await;
        match &result {
            Ok(outcome) => self.events.publish(DomainEvent::TurnCompleted {
                session_id: key.session_id.clone(),
                rounds: outcome.rounds,
                tool_calls: outcome.tool_calls,
                timestamp: Utc::now(),
            }),
            Err(e) => {
                warn!(session_id = %key.session_id, error = %e, "Turn failed");
                self.events.publish(DomainEvent::TurnFailed {
                    session_id: key.session_id.clone(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
        result.map_err(TurnError::from)
    }

    async fn run_profile(
        &self,
        profile: &AssistantProfile,
        key: &SessionKey,
        text: &str,
    ) -> Result<TurnOutcome, EngineError> {
        let mut log = MessageLog::load(
            self.store.clone(),
            key.clone(),
            Some(profile.system_prompt.as_str()),
        )
        .await?;

        if log.is_new_session() {
            let title = derive_title(text, self.title_max_chars);
            if let Err(e) = self.store.set_title(key, &title).await {
                warn!(session_id = %key.session_id, error = %e, "Could not store session title");
            }
        }

        log.append(Message::user(text)).await?;
        self.controller.run(profile, &mut log).await
    }

    /// Sessions of one user, most recent first.
    pub async fn sessions(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<SessionSummary>, StoreError> {
        self.store.sessions(tenant_id, user_id).await
    }

    pub async fn history(&self, key: &SessionKey) -> Result<Vec<Message>, StoreError> {
        self.store.list(key).await
    }
}

/// A short session title from the first user message: whitespace collapsed,
/// at most `max_chars` characters including the trailing `…` when cut.
pub fn derive_title(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut title: String = collapsed
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>()
        .trim_end()
        .to_string();
    title.push('…');
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, Step, tool_call};
    use deskpilot_store::InMemoryStore;
    use tokio_stream::StreamExt;

    fn service(provider: Arc<ScriptedProvider>, store: Arc<InMemoryStore>) -> ChatService {
        let events = Arc::new(EventBus::default());
        let provider: Arc<dyn Provider> = provider;
        let controller = RoundController::new(
            CompletionClient::new(provider, "mock-model"),
            ToolDispatcher::new(events.clone()),
            events.clone(),
        );
        ChatService::new(store, controller, StreamingRelay::new(4, Duration::ZERO), events)
            .with_assistant(AssistantProfile::new("ops", "Be brief.", ToolRegistry::new()))
    }

    fn key() -> SessionKey {
        SessionKey::new("acme", "u1", "s1")
    }

    #[test]
    fn title_is_collapsed_and_truncated() {
        assert_eq!(derive_title("  show   me\nvip customers ", 50), "show me vip customers");
        let long = derive_title("which customers have open orders this quarter", 20);
        assert_eq!(long.chars().count(), 20);
        assert!(long.ends_with('…'));
        assert_eq!(derive_title("héllo wörld ünïcode", 6), "héllo…");
    }

    #[tokio::test]
    async fn submit_turn_streams_answer_then_done() {
        let provider = Arc::new(ScriptedProvider::new(vec![Step::text("Hello there, friend")]));
        let store = Arc::new(InMemoryStore::new());
        let reply = service(provider, store)
            .submit_turn("ops", &key(), "hi")
            .await
            .unwrap();

        let events: Vec<TurnEvent> = reply.events.collect().await;
        let (last, chunks) = events.split_last().unwrap();
        assert_eq!(*last, TurnEvent::Done);
        let text: String = chunks
            .iter()
            .map(|e| match e {
                TurnEvent::Chunk { content } => content.as_str(),
                TurnEvent::Done => panic!("done before the end"),
            })
            .collect();
        assert_eq!(text, "Hello there, friend");
    }

    #[tokio::test]
    async fn title_is_set_on_first_turn_only() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Step::text("one"),
            Step::text("two"),
        ]));
        let store = Arc::new(InMemoryStore::new());
        let service = service(provider, store.clone());

        service.run_turn("ops", &key(), "First question").await.unwrap();
        service.run_turn("ops", &key(), "Second question").await.unwrap();

        let summary = store.session(&key()).await.unwrap().unwrap();
        assert_eq!(summary.title.as_deref(), Some("First question"));
        assert_eq!(summary.message_count, 4);
    }

    #[tokio::test]
    async fn later_turns_see_earlier_history() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Step::tools(vec![tool_call("c1", "missing", serde_json::json!({}))]),
            Step::text("one"),
            Step::text("two"),
        ]));
        let store = Arc::new(InMemoryStore::new());
        let service = service(provider.clone(), store);

        service.run_turn("ops", &key(), "first").await.unwrap();
        service.run_turn("ops", &key(), "second").await.unwrap();

        // system + user + assistant(tools) + tool + assistant + user
        let last = provider.requests().pop().unwrap();
        assert_eq!(last.messages.len(), 6);
        assert_eq!(last.messages.last().unwrap().content, "second");
    }

    #[tokio::test]
    async fn rejects_unknown_assistant_and_empty_message() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let service = service(provider.clone(), Arc::new(InMemoryStore::new()));

        let err = service.run_turn("nobody", &key(), "hi").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
        let err = service.run_turn("ops", &key(), "   ").await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn service_failure_is_reported_before_streaming() {
        let provider = Arc::new(ScriptedProvider::new(vec![Step::fail(500), Step::fail(500)]));
        let store = Arc::new(InMemoryStore::new());
        let service = service(provider, store);
        let mut rx = service.events().subscribe();

        let err = match service.submit_turn("ops", &key(), "hi").await {
            Err(e) => e,
            Ok(_) => panic!("expected failure"),
        };
        assert_eq!(err.status_code(), 502);

        let mut failed = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event.as_ref(), DomainEvent::TurnFailed { .. }) {
                failed = true;
            }
        }
        assert!(failed);
    }
}
