//! Shared test helpers for engine tests.

use deskpilot_core::error::ProviderError;
use deskpilot_core::message::{Message, MessageToolCall};
use deskpilot_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One scripted reaction of [`ScriptedProvider`].
#[derive(Clone)]
pub enum Step {
    Reply(ProviderResponse),
    Fail(ProviderError),
    /// Never answers in any reasonable time.
    Stall,
}

impl Step {
    pub fn text(text: &str) -> Self {
        Self::Reply(response(Message::assistant(text)))
    }

    pub fn tools(calls: Vec<MessageToolCall>) -> Self {
        Self::Reply(response(Message::assistant_tool_request("", calls)))
    }

    pub fn fail(status_code: u16) -> Self {
        Self::Fail(ProviderError::ApiError {
            status_code,
            message: "scripted failure".into(),
        })
    }

    pub fn stall() -> Self {
        Self::Stall
    }
}

fn response(message: Message) -> ProviderResponse {
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// A mock provider that replays scripted steps in order and records every
/// request it receives.
///
/// Panics if more calls are made than steps provided, unless a repeating
/// step was set with [`ScriptedProvider::then_forever`].
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    forever: Option<Step>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            forever: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn then_forever(mut self, step: Step) -> Self {
        self.forever = Some(step);
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.forever.clone());

        match step {
            Some(Step::Reply(response)) => Ok(response),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Stall) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Timeout("stalled".into()))
            }
            None => panic!(
                "ScriptedProvider exhausted after {} calls",
                self.call_count()
            ),
        }
    }
}

/// Helper to create a tool call.
pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}
