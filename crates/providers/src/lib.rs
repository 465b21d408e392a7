//! Completion provider implementations for DeskPilot.
//!
//! All providers implement the `deskpilot_core::Provider` trait.
//! The router selects the correct provider based on configuration.

pub mod openai_compat;
pub mod router;
pub mod sse;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, build_from_config};
pub use sse::{SseDecoder, SseEvent};
