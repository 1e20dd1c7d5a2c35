//! SQLite conversation store.
//!
//! Uses a single SQLite database file with two tables:
//! - `conversations`: one row per conversation
//! - `messages`: one row per completed turn, cascading on conversation delete

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use overlay_core::error::StoreError;
use overlay_core::store::{ConversationRecord, ConversationStore, MessageRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite-backed conversation store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a store from a SQLite URL or file path.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite conversation store initialized at {path}");
        Ok(store)
    }

    /// Open a database file, creating parent directories as needed.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Storage(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
        Self::new(&format!("sqlite://{}", path.display())).await
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id          TEXT PRIMARY KEY NOT NULL,
                title       TEXT NOT NULL,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id               TEXT PRIMARY KEY NOT NULL,
                conversation_id  TEXT NOT NULL
                                 REFERENCES conversations(id) ON DELETE CASCADE,
                message          TEXT NOT NULL,
                ai_response      TEXT NOT NULL,
                file             TEXT,
                created_at       TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation_created \
             ON messages(conversation_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_conversation(
        row: &sqlx::sqlite::SqliteRow,
    ) -> Result<ConversationRecord, StoreError> {
        Ok(ConversationRecord {
            id: row
                .try_get("id")
                .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?,
            title: row
                .try_get("title")
                .map_err(|e| StoreError::QueryFailed(format!("title column: {e}")))?,
            created_at: parse_timestamp(row)?,
        })
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<MessageRecord, StoreError> {
        Ok(MessageRecord {
            id: row
                .try_get("id")
                .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?,
            conversation_id: row
                .try_get("conversation_id")
                .map_err(|e| StoreError::QueryFailed(format!("conversation_id column: {e}")))?,
            message: row
                .try_get("message")
                .map_err(|e| StoreError::QueryFailed(format!("message column: {e}")))?,
            ai_response: row
                .try_get("ai_response")
                .map_err(|e| StoreError::QueryFailed(format!("ai_response column: {e}")))?,
            file: row
                .try_get("file")
                .map_err(|e| StoreError::QueryFailed(format!("file column: {e}")))?,
            created_at: parse_timestamp(row)?,
        })
    }
}

/// Fixed-width RFC 3339 so text order equals time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &sqlx::sqlite::SqliteRow) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = row
        .try_get("created_at")
        .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::QueryFailed(format!("created_at value {raw:?}: {e}")))
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, title, created_at FROM conversations ORDER BY created_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("LIST conversations: {e}")))?;

        rows.iter().map(Self::row_to_conversation).collect()
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<ConversationRecord>, StoreError> {
        let row = sqlx::query("SELECT id, title, created_at FROM conversations WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("GET conversation: {e}")))?;

        match row {
            Some(ref r) => Ok(Some(Self::row_to_conversation(r)?)),
            None => Ok(None),
        }
    }

    async fn add_conversation(&self, id: &str, title: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO conversations (id, title, created_at) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind(title)
            .bind(format_timestamp(&Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("INSERT conversation failed: {e}")))?;

        debug!(conversation_id = %id, "Conversation created");
        Ok(())
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, message, ai_response, file, created_at \
             FROM messages WHERE conversation_id = ?1 \
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("LIST messages: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn add_message(&self, record: MessageRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, message, ai_response, file, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&record.id)
        .bind(&record.conversation_id)
        .bind(&record.message)
        .bind(&record.ai_response)
        .bind(&record.file)
        .bind(format_timestamp(&record.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("FOREIGN KEY") {
                StoreError::ConversationNotFound(record.conversation_id.clone())
            } else {
                StoreError::Storage(format!("INSERT message failed: {e}"))
            }
        })?;

        Ok(())
    }
}
