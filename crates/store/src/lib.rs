//! Message log backends for DeskPilot.
//!
//! Every backend implements `deskpilot_core::MessageStore`.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
