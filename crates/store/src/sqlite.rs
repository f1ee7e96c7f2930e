//! SQLite store backend.
//!
//! Uses a single database file with three tables:
//! - `conversations` — one row per conversation
//! - `messages` — parts serialized as a JSON array, `schema_version`
//!   column reserved for future part-shape changes (currently 1)
//! - `usage_records` — one row per completed assistant message
//!
//! Message ordering within a conversation relies on the autoincrement
//! rowid, so two messages written in the same millisecond still list in
//! insertion order.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use chatrelay_core::{
    Conversation, ConversationId, ConversationPage, ConversationStats, DailyUsage, HistoryStore,
    Message, MessageMetadata, MessagePart, ModelUsage, NewMessage, Role, StoreError,
    TopConversation, UsageOverview, UsageRecord, UsageStore,
};

const PARTS_SCHEMA_VERSION: i64 = 1;

/// The production SQLite store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `":memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // In-memory databases are per-connection, so the pool must not
        // hand out a second (empty) one.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Run schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                title       TEXT,
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
                iid             INTEGER PRIMARY KEY AUTOINCREMENT,
                id              TEXT UNIQUE NOT NULL,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                role            TEXT NOT NULL,
                parts           TEXT NOT NULL,
                metadata        TEXT NOT NULL DEFAULT '{}',
                schema_version  INTEGER NOT NULL DEFAULT 1,
                created_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_records (
                iid                 INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id             TEXT NOT NULL,
                conversation_id     TEXT NOT NULL,
                message_id          TEXT NOT NULL,
                model               TEXT NOT NULL,
                input_tokens        INTEGER NOT NULL,
                output_tokens       INTEGER NOT NULL,
                total_tokens        INTEGER NOT NULL,
                cached_input_tokens INTEGER NOT NULL DEFAULT 0,
                reasoning_tokens    INTEGER NOT NULL DEFAULT 0,
                estimated_cost      REAL NOT NULL,
                created_at          TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("usage_records table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations index: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_usage_user ON usage_records(user_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("usage index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let user_id: String = row
            .try_get("user_id")
            .map_err(|e| StoreError::QueryFailed(format!("user_id column: {e}")))?;
        let title: Option<String> = row
            .try_get("title")
            .map_err(|e| StoreError::QueryFailed(format!("title column: {e}")))?;
        let created_at = Self::parse_timestamp(row, "created_at")?;

        Ok(Conversation {
            id: ConversationId(id),
            user_id,
            title,
            created_at,
        })
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let conversation_id: String = row
            .try_get("conversation_id")
            .map_err(|e| StoreError::QueryFailed(format!("conversation_id column: {e}")))?;
        let role_str: String = row
            .try_get("role")
            .map_err(|e| StoreError::QueryFailed(format!("role column: {e}")))?;
        let parts_json: String = row
            .try_get("parts")
            .map_err(|e| StoreError::QueryFailed(format!("parts column: {e}")))?;
        let metadata_json: String = row
            .try_get("metadata")
            .map_err(|e| StoreError::QueryFailed(format!("metadata column: {e}")))?;
        let created_at = Self::parse_timestamp(row, "created_at")?;

        let role = role_str
            .parse::<Role>()
            .map_err(StoreError::QueryFailed)?;
        let parts: Vec<MessagePart> = serde_json::from_str(&parts_json)
            .map_err(|e| StoreError::QueryFailed(format!("parts JSON: {e}")))?;
        let metadata: MessageMetadata = serde_json::from_str(&metadata_json).unwrap_or_default();

        Ok(Message {
            id,
            conversation_id: ConversationId(conversation_id),
            role,
            parts,
            metadata,
            created_at,
        })
    }

    fn parse_timestamp(
        row: &sqlx::sqlite::SqliteRow,
        column: &str,
    ) -> Result<chrono::DateTime<Utc>, StoreError> {
        let raw: String = row
            .try_get(column)
            .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))?;
        Ok(chrono::DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()))
    }

    fn get_column(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<String, StoreError> {
        row.try_get(column)
            .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
    }

    fn get_i64(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<i64, StoreError> {
        row.try_get(column)
            .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
    }

    fn get_f64(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<f64, StoreError> {
        row.try_get(column)
            .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<String>,
    ) -> Result<Conversation, StoreError> {
        let conversation = Conversation::new(user_id, title);

        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&conversation.id.0)
        .bind(&conversation.user_id)
        .bind(&conversation.title)
        .bind(conversation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT conversation: {e}")))?;

        debug!("Created conversation {}", conversation.id);
        Ok(conversation)
    }

    async fn resolve_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?1")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT conversation: {e}")))?;

        match row {
            Some(ref r) => Ok(Some(Self::row_to_conversation(r)?)),
            None => Ok(None),
        }
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<ConversationPage, StoreError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);
        let offset = (page - 1) as i64 * page_size as i64;

        let total_row = sqlx::query("SELECT COUNT(*) AS cnt FROM conversations WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("COUNT conversations: {e}")))?;
        let total: i64 = total_row
            .try_get("cnt")
            .map_err(|e| StoreError::QueryFailed(format!("cnt column: {e}")))?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM conversations
            WHERE user_id = ?1
            ORDER BY created_at DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(user_id)
        .bind(page_size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT conversations: {e}")))?;

        let items = rows
            .iter()
            .map(Self::row_to_conversation)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ConversationPage {
            items,
            total: total as u64,
            page,
            page_size,
        })
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE conversation: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query("SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY iid ASC")
            .bind(&id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT messages: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let parts_json = serde_json::to_string(&message.parts)
            .map_err(|e| StoreError::Storage(format!("parts serialization: {e}")))?;
        let metadata_json = serde_json::to_string(&message.metadata)
            .map_err(|e| StoreError::Storage(format!("metadata serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, parts, metadata, schema_version, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&id)
        .bind(&message.conversation_id.0)
        .bind(message.role.as_str())
        .bind(&parts_json)
        .bind(&metadata_json)
        .bind(PARTS_SCHEMA_VERSION)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT message: {e}")))?;

        debug!("Stored {} message {id}", message.role.as_str());
        Ok(Message {
            id,
            conversation_id: message.conversation_id,
            role: message.role,
            parts: message.parts,
            metadata: message.metadata,
            created_at,
        })
    }

    async fn delete_last_message(
        &self,
        id: &ConversationId,
        role: Role,
    ) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = ?1 AND role = ?2
            ORDER BY iid DESC
            LIMIT 1
            "#,
        )
        .bind(&id.0)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT last message: {e}")))?;

        let Some(ref row) = row else {
            return Ok(None);
        };
        let message = Self::row_to_message(row)?;

        sqlx::query("DELETE FROM messages WHERE id = ?1")
            .bind(&message.id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE message: {e}")))?;

        debug!("Deleted last {} message {}", role.as_str(), message.id);
        Ok(Some(message))
    }
}

#[async_trait]
impl UsageStore for SqliteStore {
    async fn create_usage(&self, record: UsageRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO usage_records (
                user_id, conversation_id, message_id, model,
                input_tokens, output_tokens, total_tokens,
                cached_input_tokens, reasoning_tokens, estimated_cost, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.conversation_id.0)
        .bind(&record.message_id)
        .bind(&record.model)
        .bind(record.input_tokens as i64)
        .bind(record.output_tokens as i64)
        .bind(record.total_tokens as i64)
        .bind(record.cached_input_tokens as i64)
        .bind(record.reasoning_tokens as i64)
        .bind(record.estimated_cost)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT usage: {e}")))?;

        Ok(())
    }

    async fn overview(&self, user_id: &str) -> Result<UsageOverview, StoreError> {
        let conv_row = sqlx::query("SELECT COUNT(*) AS cnt FROM conversations WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("COUNT conversations: {e}")))?;
        let total_conversations: i64 = conv_row
            .try_get("cnt")
            .map_err(|e| StoreError::QueryFailed(format!("cnt column: {e}")))?;

        let msg_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS cnt FROM messages m
            JOIN conversations c ON c.id = m.conversation_id
            WHERE c.user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("COUNT messages: {e}")))?;
        let total_messages: i64 = msg_row
            .try_get("cnt")
            .map_err(|e| StoreError::QueryFailed(format!("cnt column: {e}")))?;

        let usage_row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS cnt,
                COALESCE(SUM(input_tokens), 0) AS input_sum,
                COALESCE(SUM(output_tokens), 0) AS output_sum,
                COALESCE(SUM(total_tokens), 0) AS total_sum,
                COALESCE(SUM(estimated_cost), 0.0) AS cost_sum
            FROM usage_records
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SUM usage: {e}")))?;

        let total_requests: i64 = usage_row
            .try_get("cnt")
            .map_err(|e| StoreError::QueryFailed(format!("cnt column: {e}")))?;
        let total_input_tokens: i64 = usage_row
            .try_get("input_sum")
            .map_err(|e| StoreError::QueryFailed(format!("input_sum column: {e}")))?;
        let total_output_tokens: i64 = usage_row
            .try_get("output_sum")
            .map_err(|e| StoreError::QueryFailed(format!("output_sum column: {e}")))?;
        let total_tokens: i64 = usage_row
            .try_get("total_sum")
            .map_err(|e| StoreError::QueryFailed(format!("total_sum column: {e}")))?;
        let estimated_cost: f64 = usage_row
            .try_get("cost_sum")
            .map_err(|e| StoreError::QueryFailed(format!("cost_sum column: {e}")))?;

        // created_at is RFC 3339, so the first 10 chars are the UTC day
        let today_row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(total_tokens), 0) AS total_sum,
                COALESCE(SUM(estimated_cost), 0.0) AS cost_sum
            FROM usage_records
            WHERE user_id = ?1 AND substr(created_at, 1, 10) = date('now')
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SUM today usage: {e}")))?;

        let today_tokens: i64 = today_row
            .try_get("total_sum")
            .map_err(|e| StoreError::QueryFailed(format!("total_sum column: {e}")))?;
        let today_cost: f64 = today_row
            .try_get("cost_sum")
            .map_err(|e| StoreError::QueryFailed(format!("cost_sum column: {e}")))?;

        Ok(UsageOverview {
            total_conversations: total_conversations as u64,
            total_messages: total_messages as u64,
            total_requests: total_requests as u64,
            total_input_tokens: total_input_tokens as u64,
            total_output_tokens: total_output_tokens as u64,
            total_tokens: total_tokens as u64,
            estimated_cost,
            today_tokens: today_tokens as u64,
            today_cost,
        })
    }

    async fn daily_usage(&self, user_id: &str, days: u32) -> Result<Vec<DailyUsage>, StoreError> {
        let since = format!("-{} days", days.max(1));
        let rows = sqlx::query(
            r#"
            SELECT
                substr(created_at, 1, 10) AS day,
                COUNT(*) AS cnt,
                SUM(input_tokens) AS input_sum,
                SUM(output_tokens) AS output_sum,
                SUM(total_tokens) AS total_sum,
                SUM(estimated_cost) AS cost_sum
            FROM usage_records
            WHERE user_id = ?1 AND substr(created_at, 1, 10) >= date('now', ?2)
            GROUP BY day
            ORDER BY day ASC
            "#,
        )
        .bind(user_id)
        .bind(&since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("GROUP daily usage: {e}")))?;

        rows.iter()
            .map(|row| {
                Ok(DailyUsage {
                    date: Self::get_column(row, "day")?,
                    count: Self::get_i64(row, "cnt")? as u64,
                    input_tokens: Self::get_i64(row, "input_sum")? as u64,
                    output_tokens: Self::get_i64(row, "output_sum")? as u64,
                    total_tokens: Self::get_i64(row, "total_sum")? as u64,
                    cost: Self::get_f64(row, "cost_sum")?,
                })
            })
            .collect()
    }

    async fn usage_by_model(&self, user_id: &str) -> Result<Vec<ModelUsage>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                model,
                COUNT(*) AS cnt,
                SUM(input_tokens) AS input_sum,
                SUM(output_tokens) AS output_sum,
                SUM(total_tokens) AS total_sum,
                SUM(estimated_cost) AS cost_sum
            FROM usage_records
            WHERE user_id = ?1
            GROUP BY model
            ORDER BY total_sum DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("GROUP model usage: {e}")))?;

        rows.iter()
            .map(|row| {
                Ok(ModelUsage {
                    model: Self::get_column(row, "model")?,
                    count: Self::get_i64(row, "cnt")? as u64,
                    input_tokens: Self::get_i64(row, "input_sum")? as u64,
                    output_tokens: Self::get_i64(row, "output_sum")? as u64,
                    total_tokens: Self::get_i64(row, "total_sum")? as u64,
                    cost: Self::get_f64(row, "cost_sum")?,
                })
            })
            .collect()
    }

    async fn conversation_stats(
        &self,
        id: &ConversationId,
    ) -> Result<ConversationStats, StoreError> {
        let msg_row = sqlx::query("SELECT COUNT(*) AS cnt FROM messages WHERE conversation_id = ?1")
            .bind(&id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("COUNT messages: {e}")))?;
        let message_count = Self::get_i64(&msg_row, "cnt")? as u64;

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS cnt,
                COALESCE(SUM(input_tokens), 0) AS input_sum,
                COALESCE(SUM(output_tokens), 0) AS output_sum,
                COALESCE(SUM(total_tokens), 0) AS total_sum,
                COALESCE(SUM(estimated_cost), 0.0) AS cost_sum
            FROM usage_records
            WHERE conversation_id = ?1
            "#,
        )
        .bind(&id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SUM conversation usage: {e}")))?;

        Ok(ConversationStats {
            message_count,
            request_count: Self::get_i64(&row, "cnt")? as u64,
            input_tokens: Self::get_i64(&row, "input_sum")? as u64,
            output_tokens: Self::get_i64(&row, "output_sum")? as u64,
            total_tokens: Self::get_i64(&row, "total_sum")? as u64,
            estimated_cost: Self::get_f64(&row, "cost_sum")?,
        })
    }

    async fn top_conversations(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<TopConversation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                u.conversation_id AS conversation_id,
                c.title AS title,
                COUNT(*) AS cnt,
                SUM(u.total_tokens) AS total_sum,
                SUM(u.estimated_cost) AS cost_sum
            FROM usage_records u
            LEFT JOIN conversations c ON c.id = u.conversation_id
            WHERE u.user_id = ?1
            GROUP BY u.conversation_id
            ORDER BY total_sum DESC
            LIMIT ?2
            "#,
        )
        .bind(user_id)
        .bind(limit.clamp(1, 100) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("GROUP top conversations: {e}")))?;

        rows.iter()
            .map(|row| {
                let title: Option<String> = row
                    .try_get("title")
                    .map_err(|e| StoreError::QueryFailed(format!("title column: {e}")))?;
                Ok(TopConversation {
                    conversation_id: ConversationId(Self::get_column(row, "conversation_id")?),
                    title,
                    request_count: Self::get_i64(row, "cnt")? as u64,
                    total_tokens: Self::get_i64(row, "total_sum")? as u64,
                    cost: Self::get_f64(row, "cost_sum")?,
                })
            })
            .collect()
    }
}
