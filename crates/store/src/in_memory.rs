//! In-memory backend: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deskpilot_core::error::StoreError;
use deskpilot_core::message::{Message, SessionKey, SessionSummary};
use deskpilot_core::store::MessageStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

struct SessionLog {
    title: Option<String>,
    messages: Vec<Message>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SessionLog {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            title: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn summary(&self, session_id: &str) -> SessionSummary {
        SessionSummary {
            session_id: session_id.to_string(),
            title: self.title.clone(),
            message_count: self.messages.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// A message store that keeps every session log in a HashMap.
/// Nothing survives a restart.
#[derive(Clone)]
pub struct InMemoryStore {
    sessions: Arc<RwLock<HashMap<SessionKey, SessionLog>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, key: &SessionKey, message: Message) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let log = sessions.entry(key.clone()).or_insert_with(SessionLog::new);
        log.messages.push(message);
        log.updated_at = Utc::now();
        Ok(())
    }

    async fn list(&self, key: &SessionKey) -> Result<Vec<Message>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(key)
            .map(|log| log.messages.clone())
            .unwrap_or_default())
    }

    async fn session(&self, key: &SessionKey) -> Result<Option<SessionSummary>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(key).map(|log| log.summary(&key.session_id)))
    }

    async fn set_title(&self, key: &SessionKey, title: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let log = sessions.entry(key.clone()).or_insert_with(SessionLog::new);
        log.title = Some(title.to_string());
        Ok(())
    }

    async fn sessions(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<SessionSummary>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .filter(|(key, _)| key.tenant_id == tenant_id && key.user_id == user_id)
            .map(|(key, log)| log.summary(&key.session_id))
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(session: &str) -> SessionKey {
        SessionKey::new("acme", "u1", session)
    }

    #[tokio::test]
    async fn append_preserves_order() {
        let store = InMemoryStore::new();
        store.append(&key("s1"), Message::user("first")).await.unwrap();
        store.append(&key("s1"), Message::assistant("second")).await.unwrap();
        store.append(&key("s1"), Message::user("third")).await.unwrap();

        let contents: Vec<String> = store
            .list(&key("s1"))
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn unknown_session_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.list(&key("nope")).await.unwrap().is_empty());
        assert!(store.session(&key("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let store = InMemoryStore::new();
        store.append(&key("s1"), Message::user("acme data")).await.unwrap();

        let other = SessionKey::new("globex", "u1", "s1");
        assert!(store.list(&other).await.unwrap().is_empty());
        assert!(store.sessions("globex", "u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn title_and_listing() {
        let store = InMemoryStore::new();
        store.append(&key("s1"), Message::user("hello")).await.unwrap();
        store.set_title(&key("s1"), "hello").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.append(&key("s2"), Message::user("later")).await.unwrap();

        let summaries = store.sessions("acme", "u1").await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].session_id, "s2");
        let s1 = summaries.iter().find(|s| s.session_id == "s1").unwrap();
        assert_eq!(s1.title.as_deref(), Some("hello"));
        assert_eq!(s1.message_count, 1);
    }
}
