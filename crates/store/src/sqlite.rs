//! SQLite backend for session message logs.
//!
//! Uses a single SQLite database file with two tables:
//! - `sessions`: one row per (tenant, user, session) with title and timestamps
//! - `messages`: the log entries; an autoincrement `seq` fixes insertion order
//!
//! Messages are stored as JSON so the schema does not change when the
//! message type grows a field.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use deskpilot_core::error::StoreError;
use deskpilot_core::message::{Message, SessionKey, SessionSummary};
use deskpilot_core::store::MessageStore;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite message store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database; it is held on a
    /// single connection so every query sees the same data.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let in_memory = path.contains(":memory:");
        let url = if in_memory || path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite://{path}")
        };

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::Unavailable(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite message store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create tables and indexes.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                tenant_id   TEXT NOT NULL,
                user_id     TEXT NOT NULL,
                session_id  TEXT NOT NULL,
                title       TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (tenant_id, user_id, session_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("sessions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id   TEXT NOT NULL,
                user_id     TEXT NOT NULL,
                session_id  TEXT NOT NULL,
                body        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_session \
             ON messages(tenant_id, user_id, session_id, seq)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Fixed-width RFC 3339 so timestamps sort lexicographically.
    fn timestamp(at: DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn parse_timestamp(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_summary(row: &sqlx::sqlite::SqliteRow) -> Result<SessionSummary, StoreError> {
        let session_id: String = row
            .try_get("session_id")
            .map_err(|e| StoreError::QueryFailed(format!("session_id column: {e}")))?;
        let title: Option<String> = row
            .try_get("title")
            .map_err(|e| StoreError::QueryFailed(format!("title column: {e}")))?;
        let message_count: i64 = row
            .try_get("message_count")
            .map_err(|e| StoreError::QueryFailed(format!("message_count column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;
        let updated_at: String = row
            .try_get("updated_at")
            .map_err(|e| StoreError::QueryFailed(format!("updated_at column: {e}")))?;

        Ok(SessionSummary {
            session_id,
            title,
            message_count: message_count.max(0) as usize,
            created_at: Self::parse_timestamp(&created_at),
            updated_at: Self::parse_timestamp(&updated_at),
        })
    }
}

const SUMMARY_COLUMNS: &str = r#"
    s.session_id, s.title, s.created_at, s.updated_at,
    (SELECT COUNT(*) FROM messages m
      WHERE m.tenant_id = s.tenant_id AND m.user_id = s.user_id
        AND m.session_id = s.session_id) AS message_count
"#;

#[async_trait]
impl MessageStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, key: &SessionKey, message: Message) -> Result<(), StoreError> {
        let body = serde_json::to_string(&message)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let now = Self::timestamp(Utc::now());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Unavailable(format!("BEGIN failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO sessions (tenant_id, user_id, session_id, title, created_at, updated_at)
            VALUES (?1, ?2, ?3, NULL, ?4, ?4)
            ON CONFLICT(tenant_id, user_id, session_id) DO UPDATE SET
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&key.tenant_id)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("session upsert: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO messages (tenant_id, user_id, session_id, body, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&key.tenant_id)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .bind(&body)
        .bind(Self::timestamp(message.timestamp))
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("INSERT failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Unavailable(format!("COMMIT failed: {e}")))?;

        debug!(session = %key, role = message.role.as_str(), "Appended message");
        Ok(())
    }

    async fn list(&self, key: &SessionKey) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM messages
            WHERE tenant_id = ?1 AND user_id = ?2 AND session_id = ?3
            ORDER BY seq ASC
            "#,
        )
        .bind(&key.tenant_id)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("list: {e}")))?;

        rows.iter()
            .map(|row| {
                let body: String = row
                    .try_get("body")
                    .map_err(|e| StoreError::QueryFailed(format!("body column: {e}")))?;
                serde_json::from_str(&body).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .collect()
    }

    async fn session(&self, key: &SessionKey) -> Result<Option<SessionSummary>, StoreError> {
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM sessions s \
             WHERE s.tenant_id = ?1 AND s.user_id = ?2 AND s.session_id = ?3"
        );
        let row = sqlx::query(&sql)
            .bind(&key.tenant_id)
            .bind(&key.user_id)
            .bind(&key.session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("session: {e}")))?;

        row.as_ref().map(Self::row_to_summary).transpose()
    }

    async fn set_title(&self, key: &SessionKey, title: &str) -> Result<(), StoreError> {
        let now = Self::timestamp(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO sessions (tenant_id, user_id, session_id, title, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(tenant_id, user_id, session_id) DO UPDATE SET
                title = excluded.title
            "#,
        )
        .bind(&key.tenant_id)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .bind(title)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("set_title: {e}")))?;
        Ok(())
    }

    async fn sessions(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<SessionSummary>, StoreError> {
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM sessions s \
             WHERE s.tenant_id = ?1 AND s.user_id = ?2 \
             ORDER BY s.updated_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("sessions: {e}")))?;

        rows.iter().map(Self::row_to_summary).collect()
    }
}
