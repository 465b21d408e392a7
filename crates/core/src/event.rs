//! Domain event system: decoupled observation of the engine.
//!
//! Events are published when something interesting happens during a turn.
//! Other components (audit, metrics, the CLI) can subscribe without the
//! engine knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A user turn entered the engine
    TurnStarted {
        session_id: String,
        assistant: String,
        timestamp: DateTime<Utc>,
    },

    /// One completion call returned
    CompletionFinished {
        session_id: String,
        round: u32,
        model: String,
        /// "final", "tool_requested" or "service_error"
        outcome: String,
        tool_calls: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        session_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The first completion failed and the no-tools retry was used
    FallbackUsed {
        session_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The round budget ran out and the forced finalizer took over
    RoundsExhausted {
        session_id: String,
        rounds: u32,
        timestamp: DateTime<Utc>,
    },

    /// A turn produced its answer
    TurnCompleted {
        session_id: String,
        rounds: u32,
        tool_calls: usize,
        timestamp: DateTime<Utc>,
    },

    /// A turn failed before producing an answer
    TurnFailed {
        session_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolExecuted {
            session_id: "s1".into(),
            tool_name: "search_records".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted {
                tool_name, success, ..
            } => {
                assert_eq!(tool_name, "search_records");
                assert!(success);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::TurnFailed {
            session_id: "s1".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
