//! The tool-calling engine behind every DeskPilot assistant.
//!
//! One user turn runs as a linear sequence of awaited steps:
//!
//! 1. **Load** the session's [`MessageLog`] and append the user message
//! 2. **Complete** via the [`CompletionClient`] with the assistant's tool catalogue
//! 3. **If tool calls**: dispatch them, append one result per call, loop back to 2
//! 4. **If text**: append it as the answer
//! 5. **If the round budget runs out**: force a tool-less final answer
//! 6. **Relay** the answer as chunk events followed by `done`
//!
//! The loop is shared; assistants differ only in their [`AssistantProfile`].

pub mod completion;
pub mod dispatch;
pub mod engine;
pub mod log;
pub mod profile;
pub mod relay;
pub mod service;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use completion::{CompletionClient, CompletionOutcome};
pub use dispatch::ToolDispatcher;
pub use engine::{APOLOGY, EngineError, FINALIZE_DIRECTIVE, MAX_ROUNDS, RoundController, RoundState, TurnOutcome};
pub use log::MessageLog;
pub use profile::AssistantProfile;
pub use relay::{StreamingRelay, split_chunks};
pub use service::{ChatService, TurnError, TurnReply, derive_title};
pub use stream_event::TurnEvent;
