//! The per-invocation view of a session's message log.

use deskpilot_core::error::StoreError;
use deskpilot_core::message::{Message, Role, SessionKey};
use deskpilot_core::store::MessageStore;
use std::sync::Arc;

/// An append-only message log for one session, backed by a [`MessageStore`].
///
/// Loaded once per invocation. Every append is written through to the store
/// before it becomes visible here, so a store failure never leaves the two
/// out of step. There is no way to edit or remove an entry.
///
/// The system prompt is a preamble: it is sent with every completion request
/// but never persisted, so a profile's prompt can change between turns.
pub struct MessageLog {
    store: Arc<dyn MessageStore>,
    key: SessionKey,
    preamble: Option<Message>,
    entries: Vec<Message>,
}

impl MessageLog {
    /// Load the persisted history of `key`.
    pub async fn load(
        store: Arc<dyn MessageStore>,
        key: SessionKey,
        system_prompt: Option<&str>,
    ) -> Result<Self, StoreError> {
        let entries = store.list(&key).await?;
        Ok(Self {
            store,
            key,
            preamble: system_prompt
                .filter(|p| !p.trim().is_empty())
                .map(Message::system),
            entries,
        })
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Append one message, persisting it first.
    pub async fn append(&mut self, message: Message) -> Result<(), StoreError> {
        self.store.append(&self.key, message.clone()).await?;
        self.entries.push(message);
        Ok(())
    }

    /// The persisted entries, oldest first.
    pub fn history(&self) -> &[Message] {
        &self.entries
    }

    /// The full message list for a completion request: preamble, then history.
    pub fn messages(&self) -> Vec<Message> {
        self.preamble
            .iter()
            .chain(self.entries.iter())
            .cloned()
            .collect()
    }

    /// Whether no user turn has been recorded yet.
    pub fn is_new_session(&self) -> bool {
        !self.entries.iter().any(|m| m.role == Role::User)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
