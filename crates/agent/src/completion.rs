//! One exchange with the completion service, reduced to a tagged outcome.

use deskpilot_core::error::ProviderError;
use deskpilot_core::message::{Message, MessageToolCall};
use deskpilot_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What a completion call produced.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    /// Free text and no tool calls.
    FinalAnswer(String),

    /// One or more tool calls, possibly with accompanying text.
    ToolRequested {
        content: String,
        calls: Vec<MessageToolCall>,
    },

    /// The call failed, timed out, or was rejected.
    ServiceError(ProviderError),
}

impl CompletionOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FinalAnswer(_) => "final",
            Self::ToolRequested { .. } => "tool_requested",
            Self::ServiceError(_) => "service_error",
        }
    }

    fn from_message(message: Message) -> Self {
        if message.tool_calls.is_empty() {
            Self::FinalAnswer(message.content)
        } else {
            Self::ToolRequested {
                content: message.content,
                calls: message.tool_calls,
            }
        }
    }
}

/// Wraps a [`Provider`] with the engine's request settings and a hard
/// per-call timeout. Never returns `Err`: every failure is a
/// [`CompletionOutcome::ServiceError`].
pub struct CompletionClient {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: Duration,
    stream_upstream: bool,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.3,
            max_tokens: None,
            timeout: Duration::from_secs(60),
            stream_upstream: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Consume the provider's stream instead of waiting for a whole response.
    pub fn with_stream_upstream(mut self, enabled: bool) -> Self {
        self.stream_upstream = enabled;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// A regular round: the full log plus the tool catalogue (empty disables tools).
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
    ) -> CompletionOutcome {
        self.call(messages, tools, false).await
    }

    /// The degraded retry: tools disabled, search augmentation enabled.
    pub async fn complete_with_search(&self, messages: Vec<Message>) -> CompletionOutcome {
        self.call(messages, Vec::new(), true).await
    }

    async fn call(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        search: bool,
    ) -> CompletionOutcome {
        let mut request = ProviderRequest::new(&self.model, messages);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request.tools = tools;
        request.search = search;
        request.stream = self.stream_upstream;

        let exchange = async {
            if self.stream_upstream {
                self.collect_stream(request).await
            } else {
                self.provider.complete(request).await
            }
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(response)) => {
                if let Some(usage) = &response.usage {
                    debug!(
                        provider = %self.provider.name(),
                        model = %response.model,
                        total_tokens = usage.total_tokens,
                        "Completion finished"
                    );
                }
                CompletionOutcome::from_message(response.message)
            }
            Ok(Err(e)) => {
                warn!(provider = %self.provider.name(), error = %e, "Completion failed");
                CompletionOutcome::ServiceError(e)
            }
            Err(_) => {
                warn!(
                    provider = %self.provider.name(),
                    timeout_secs = self.timeout.as_secs(),
                    "Completion timed out"
                );
                CompletionOutcome::ServiceError(ProviderError::Timeout(format!(
                    "no response within {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }

    /// Drain a streamed response into one message.
    async fn collect_stream(
        &self,
        request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        let mut rx = self.provider.stream(request).await?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = None;
        let mut finished = false;

        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(delta) = chunk.content {
                content.push_str(&delta);
            }
            if !chunk.tool_calls.is_empty() {
                tool_calls = chunk.tool_calls;
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                finished = true;
                break;
            }
        }

        // A closed channel without a done chunk means the upstream was cut off.
        if !finished {
            return Err(ProviderError::StreamInterrupted(
                "stream closed before completion".into(),
            ));
        }

        Ok(ProviderResponse {
            message: Message::assistant_tool_request(content, tool_calls),
            usage,
            model,
        })
    }
}
