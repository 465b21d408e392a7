//! Turn-level streaming events.
//!
//! `TurnEvent` is what the streaming relay emits and what the gateway
//! forwards to clients over SSE.

use serde::{Deserialize, Serialize};

/// Events delivered to the caller of a turn.
///
/// - `chunk`: one slice of the final answer, in order
/// - `done` : always last, emitted exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A slice of the answer text.
    Chunk { content: String },

    /// The answer is complete.
    Done,
}

impl TurnEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Done => "done",
        }
    }

    /// The SSE `data:` payload.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Chunk { content } => serde_json::json!({ "content": content }),
            Self::Done => serde_json::json!({}),
        }
    }
}
