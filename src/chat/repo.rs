use anyhow::Context;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

/// Persisted chat message.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChatMessage {
    pub id: i64,
    #[serde(rename = "from")]
    #[sqlx(rename = "sender")]
    pub from: String,
    pub role: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Last known socket of a chat participant, one row per username.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserSocket {
    pub id: i64,
    pub username: String,
    pub role: String,
    #[serde(rename = "socketId")]
    pub socket_id: String,
}

impl ChatMessage {
    pub async fn insert(db: &PgPool, from: &str, role: &str, content: &str) -> anyhow::Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO messages (sender, role, content) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(from)
        .bind(role)
        .bind(content)
        .fetch_one(db)
        .await
        .context("insert chat message")?;
        Ok(id)
    }

    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<ChatMessage>> {
        let rows = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, sender, role, content, created_at FROM messages ORDER BY created_at, id",
        )
        .fetch_all(db)
        .await
        .context("list chat messages")?;
        Ok(rows)
    }

    pub async fn find(db: &PgPool, id: i64) -> anyhow::Result<Option<ChatMessage>> {
        let row = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, sender, role, content, created_at FROM messages WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await
        .context("find chat message")?;
        Ok(row)
    }

    /// Messages sent by `username`.
    pub async fn by_sender(db: &PgPool, username: &str) -> anyhow::Result<Vec<ChatMessage>> {
        let rows = sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT id, sender, role, content, created_at
            FROM messages
            WHERE sender = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(username)
        .fetch_all(db)
        .await
        .context("list chat messages by sender")?;
        Ok(rows)
    }

    pub async fn delete(db: &PgPool, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .context("delete chat message")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn delete_many(db: &PgPool, ids: &[i64]) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM messages WHERE id = ANY($1)")
            .bind(ids)
            .execute(db)
            .await
            .context("delete chat messages")?;
        Ok(res.rows_affected())
    }
}

impl UserSocket {
    pub async fn upsert(
        db: &PgPool,
        username: &str,
        role: &str,
        socket_id: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_sockets (username, role, socket_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (username) DO UPDATE SET role = EXCLUDED.role, socket_id = EXCLUDED.socket_id
            "#,
        )
        .bind(username)
        .bind(role)
        .bind(socket_id)
        .execute(db)
        .await
        .context("upsert user socket")?;
        Ok(())
    }

    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<UserSocket>> {
        let rows = sqlx::query_as::<_, UserSocket>(
            "SELECT id, username, role, socket_id FROM user_sockets ORDER BY id",
        )
        .fetch_all(db)
        .await
        .context("list user sockets")?;
        Ok(rows)
    }

    pub async fn by_username(db: &PgPool, username: &str) -> anyhow::Result<Option<UserSocket>> {
        let row = sqlx::query_as::<_, UserSocket>(
            "SELECT id, username, role, socket_id FROM user_sockets WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(db)
        .await
        .context("find user socket")?;
        Ok(row)
    }

    pub async fn delete(db: &PgPool, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM user_sockets WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .context("delete user socket")?;
        Ok(res.rows_affected() > 0)
    }
}
