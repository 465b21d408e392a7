//! MessageStore trait: persistence for conversation logs.
//!
//! The store is the only state that survives between turns. Each turn
//! reloads the session's log, appends to it, and leaves it behind for the
//! next turn. Entries are never mutated or removed.

use crate::error::StoreError;
use crate::message::{Message, SessionKey, SessionSummary};
use async_trait::async_trait;

/// The core MessageStore trait.
///
/// Implementations must preserve insertion order per session and be safe to
/// share between concurrently running sessions. A read issued after an
/// append returns must observe that append.
///
/// Implementations: SQLite, in-memory.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Append one message to the end of a session's log, creating the session if needed.
    async fn append(&self, key: &SessionKey, message: Message) -> Result<(), StoreError>;

    /// All messages of a session in insertion order. Unknown sessions are empty.
    async fn list(&self, key: &SessionKey) -> Result<Vec<Message>, StoreError>;

    /// Listing metadata for one session, if it exists.
    async fn session(&self, key: &SessionKey) -> Result<Option<SessionSummary>, StoreError>;

    /// Persist a display title for the session.
    async fn set_title(&self, key: &SessionKey, title: &str) -> Result<(), StoreError>;

    /// Sessions owned by one user within a tenant, most recently updated first.
    async fn sessions(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<SessionSummary>, StoreError>;
}
