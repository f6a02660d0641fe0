//! Conversation store backed by PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use uuid::Uuid;

use sage_core::{
    ConversationStore, Error, MessageMetadata, MessageRole, NewMessage, Result, StoredMessage,
    Thread, UploadDetail,
};

/// PostgreSQL implementation of [`ConversationStore`].
pub struct PgConversationStore {
    pool: Pool<Postgres>,
}

impl PgConversationStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn thread_from_row(row: &PgRow) -> Thread {
    Thread {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &PgRow) -> Result<StoredMessage> {
    let role: String = row.get("role");
    let role = MessageRole::parse(&role)
        .ok_or_else(|| Error::Internal(format!("Unknown message role: {}", role)))?;
    let metadata: serde_json::Value = row.get("metadata");
    let metadata: MessageMetadata = serde_json::from_value(metadata).unwrap_or_default();
    Ok(StoredMessage {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        role,
        content: row.get("content"),
        metadata,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn get_thread(&self, thread_id: Uuid) -> Result<Option<Thread>> {
        let row = sqlx::query(
            "SELECT id, user_id, title, created_at, updated_at FROM thread WHERE id = $1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.as_ref().map(thread_from_row))
    }

    async fn create_thread(&self, user_id: &str, title: Option<&str>) -> Result<Thread> {
        let row = sqlx::query(
            "INSERT INTO thread (id, user_id, title) VALUES ($1, $2, $3)
             RETURNING id, user_id, title, created_at, updated_at",
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(title)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(thread_from_row(&row))
    }

    async fn add_message(&self, message: NewMessage) -> Result<StoredMessage> {
        let metadata = serde_json::to_value(&message.metadata)?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let row = sqlx::query(
            "INSERT INTO message (id, thread_id, role, content, metadata)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, thread_id, role, content, metadata, created_at",
        )
        .bind(Uuid::now_v7())
        .bind(message.thread_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&metadata)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query("UPDATE thread SET updated_at = now() WHERE id = $1")
            .bind(message.thread_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        message_from_row(&row)
    }

    async fn get_messages(&self, thread_id: Uuid, limit: i64) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM (
                 SELECT id, thread_id, role, content, metadata, created_at
                 FROM message WHERE thread_id = $1
                 ORDER BY created_at DESC, id DESC
                 LIMIT $2
             ) recent ORDER BY created_at ASC, id ASC",
        )
        .bind(thread_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.iter().map(message_from_row).collect()
    }

    async fn count_messages(&self, thread_id: Uuid) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM message WHERE thread_id = $1")
            .bind(thread_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.get("n"))
    }

    async fn get_upload_paths(&self, thread_id: Uuid) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT path FROM thread_upload WHERE thread_id = $1 ORDER BY created_at",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(|r| r.get("path")).collect())
    }

    async fn get_upload_details(&self, thread_id: Uuid) -> Result<Vec<UploadDetail>> {
        let rows = sqlx::query(
            "SELECT path, filename, mime_type, size_bytes
             FROM thread_upload WHERE thread_id = $1 ORDER BY created_at",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows
            .iter()
            .map(|r| UploadDetail {
                path: r.get("path"),
                filename: r.get("filename"),
                mime_type: r.get("mime_type"),
                size_bytes: r.get("size_bytes"),
            })
            .collect())
    }

    async fn get_summary(&self, thread_id: Uuid) -> Result<Option<String>> {
        let row = sqlx::query("SELECT summary FROM thread WHERE id = $1")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.and_then(|r| r.get::<Option<String>, _>("summary")))
    }

    async fn set_summary(&self, thread_id: Uuid, summary: &str) -> Result<()> {
        let done = sqlx::query("UPDATE thread SET summary = $2, updated_at = now() WHERE id = $1")
            .bind(thread_id)
            .bind(summary)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("thread {}", thread_id)));
        }
        Ok(())
    }

    async fn get_memories(&self, user_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT content FROM user_memory WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(|r| r.get("content")).collect())
    }

    async fn add_memories(&self, user_id: &str, memories: &[String]) -> Result<()> {
        if memories.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        for memory in memories {
            sqlx::query(
                "INSERT INTO user_memory (id, user_id, content) VALUES ($1, $2, $3)
                 ON CONFLICT (user_id, content) DO NOTHING",
            )
            .bind(Uuid::now_v7())
            .bind(user_id)
            .bind(memory)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}
