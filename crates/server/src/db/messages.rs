//! Database operations for order chat messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use starshop_core::{MessageId, OrderId, SenderRole, UserId};

use super::{MessageStore, RepositoryError};
use crate::models::{Message, NewMessage, ThreadSummary};

const MESSAGE_COLUMNS: &str =
    "id, order_id, user_id, sender_role, content, reply, replied_at, is_read, created_at";

// =============================================================================
// Internal Row Types
// =============================================================================

/// Internal row type for `PostgreSQL` message queries.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i32,
    order_id: i32,
    user_id: i32,
    sender_role: SenderRole,
    content: String,
    reply: Option<String>,
    replied_at: Option<DateTime<Utc>>,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            id: MessageId::new(row.id),
            order_id: OrderId::new(row.order_id),
            user_id: UserId::new(row.user_id),
            sender_role: row.sender_role,
            content: row.content,
            reply: row.reply,
            replied_at: row.replied_at,
            is_read: row.is_read,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ThreadRow {
    #[sqlx(flatten)]
    message: MessageRow,
    product_title: String,
    customer_id: i32,
    unread: i64,
}

impl From<ThreadRow> for ThreadSummary {
    fn from(row: ThreadRow) -> Self {
        Self {
            order_id: OrderId::new(row.message.order_id),
            product_title: row.product_title,
            customer_id: UserId::new(row.customer_id),
            last_message: row.message.into(),
            unread: row.unread,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for chat message operations.
#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
}

impl MessageRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for MessageRepository {
    async fn insert(&self, message: &NewMessage) -> Result<Message, RepositoryError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            r"
            INSERT INTO messages (order_id, user_id, sender_role, content)
            VALUES ($1, $2, $3, $4)
            RETURNING {MESSAGE_COLUMNS}
            "
        ))
        .bind(message.order_id)
        .bind(message.user_id)
        .bind(message.sender_role)
        .bind(&message.content)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list(
        &self,
        order_id: OrderId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE order_id = $1
              AND ($2::TIMESTAMPTZ IS NULL OR created_at > $2)
            ORDER BY created_at ASC, id ASC
            "
        ))
        .bind(order_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set_reply(
        &self,
        id: MessageId,
        reply: &str,
        replied_at: DateTime<Utc>,
    ) -> Result<Option<Message>, RepositoryError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            r"
            UPDATE messages
            SET reply = $2, replied_at = $3, is_read = TRUE
            WHERE id = $1
            RETURNING {MESSAGE_COLUMNS}
            "
        ))
        .bind(id)
        .bind(reply)
        .bind(replied_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn mark_read(
        &self,
        order_id: OrderId,
        author: SenderRole,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE messages
            SET is_read = TRUE
            WHERE order_id = $1 AND sender_role = $2 AND NOT is_read
            ",
        )
        .bind(order_id)
        .bind(author)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, id: MessageId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_order(&self, order_id: OrderId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM messages WHERE order_id = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn threads(
        &self,
        owner: Option<UserId>,
        unread_from: SenderRole,
    ) -> Result<Vec<ThreadSummary>, RepositoryError> {
        let rows = sqlx::query_as::<_, ThreadRow>(
            r"
            SELECT * FROM (
                SELECT DISTINCT ON (m.order_id)
                       m.id, m.order_id, m.user_id, m.sender_role, m.content, m.reply,
                       m.replied_at, m.is_read, m.created_at,
                       o.product_title,
                       o.user_id AS customer_id,
                       (SELECT COUNT(*)
                        FROM messages u
                        WHERE u.order_id = m.order_id
                          AND u.sender_role = $2
                          AND NOT u.is_read) AS unread
                FROM messages m
                JOIN orders o ON o.id = m.order_id
                WHERE $1::INT IS NULL OR o.user_id = $1
                ORDER BY m.order_id, m.created_at DESC, m.id DESC
            ) latest
            ORDER BY created_at DESC, id DESC
            ",
        )
        .bind(owner)
        .bind(unread_from)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count_unread(&self, author: SenderRole) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE sender_role = $1 AND NOT is_read",
        )
        .bind(author)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
