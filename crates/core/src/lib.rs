//! # DeskPilot Core
//!
//! Domain types, traits, and error definitions for the DeskPilot assistant engine.
//! This crate has **no I/O of its own**: it defines the boundaries the engine
//! talks through (completion service, tool catalogue, message log) and the
//! values that cross them.
//!
//! ## Boundaries
//!
//! - [`Provider`]: one request/response exchange with the completion service
//! - [`Tool`] / [`ToolRegistry`]: named, schema-described capabilities
//! - [`MessageStore`]: the persisted, append-only message log per session

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, MessageToolCall, Role, SessionKey, SessionSummary};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition};
pub use store::MessageStore;
pub use tool::{Tool, ToolCall, ToolContext, ToolOutcome, ToolRegistry, ToolResult};
