use affitto_core::{new_id, now_micros, rfc3339_from_micros, Message};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::ChatError;

/// Send request as it arrives off the wire, before validation.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub property_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
}

/// Durable append-only record of chat messages, partitioned by
/// (listing, unordered participant pair). Rows are never deleted here.
pub struct MessageStore {
    pool: SqlitePool,
}

const THREAD_SELECT: &str = "SELECT m.message_id, m.property_id, m.sender_id, su.name AS sender_name, \
            m.receiver_id, ru.name AS receiver_name, m.body, m.created_at, m.delivered \
     FROM messages m \
     JOIN users su ON su.user_id = m.sender_id \
     JOIN users ru ON ru.user_id = m.receiver_id \
     WHERE m.property_id = ? \
       AND ((m.sender_id = ? AND m.receiver_id = ?) OR (m.sender_id = ? AND m.receiver_id = ?)) \
     ORDER BY m.created_at ASC, m.rowid ASC";

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Validate and persist a message, assigning its id and timestamp. The
    /// INSERT completes before this returns, so the caller may only push/ack
    /// afterwards. Timestamps are strictly increasing within the thread: the
    /// partition max is read inside the INSERT statement itself, so two
    /// concurrent appends to the same thread cannot observe the same max;
    /// when the clock ties or steps backwards the stored value lands one
    /// microsecond past the partition max.
    pub async fn append(&self, new: NewMessage) -> Result<Message, ChatError> {
        if new.body.trim().is_empty() {
            return Err(ChatError::Validation(
                "message body must not be empty".to_string(),
            ));
        }
        if new.sender_id == new.receiver_id {
            return Err(ChatError::Validation(
                "sender and receiver must differ".to_string(),
            ));
        }

        // Resolve display names up front; an unknown participant is a bad
        // request, not a storage failure.
        let sender_name = self
            .user_name(&new.sender_id)
            .await?
            .ok_or_else(|| ChatError::Validation(format!("unknown sender {}", new.sender_id)))?;
        let receiver_name = self
            .user_name(&new.receiver_id)
            .await?
            .ok_or_else(|| ChatError::Validation(format!("unknown receiver {}", new.receiver_id)))?;

        let message_id = new_id();
        let created_at: i64 = sqlx::query_scalar(
            "INSERT INTO messages (message_id, property_id, sender_id, receiver_id, body, created_at, delivered) \
             VALUES (?, ?, ?, ?, ?, \
                 MAX(?, COALESCE((SELECT MAX(created_at) + 1 FROM messages \
                     WHERE property_id = ? \
                       AND ((sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?))), 0)), \
                 0) \
             RETURNING created_at",
        )
        .bind(&message_id)
        .bind(&new.property_id)
        .bind(&new.sender_id)
        .bind(&new.receiver_id)
        .bind(&new.body)
        .bind(now_micros())
        .bind(&new.property_id)
        .bind(&new.sender_id)
        .bind(&new.receiver_id)
        .bind(&new.receiver_id)
        .bind(&new.sender_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Message {
            message_id,
            property_id: new.property_id,
            sender_id: new.sender_id,
            sender_name,
            receiver_id: new.receiver_id,
            receiver_name,
            body: new.body,
            created_at: rfc3339_from_micros(created_at),
            delivered: false,
        })
    }

    /// Full ordered thread between two participants for one listing, in both
    /// directions, ascending by timestamp with insertion order breaking ties.
    /// Recomputed on every call; no pagination at this scope.
    pub async fn query_thread(
        &self,
        property_id: &str,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<Message>, ChatError> {
        let rows = sqlx::query(THREAD_SELECT)
            .bind(property_id)
            .bind(user_a)
            .bind(user_b)
            .bind(user_b)
            .bind(user_a)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    /// Best-effort delivery flag. Failures are logged and swallowed; the flag
    /// is not load-bearing for correctness.
    pub async fn mark_delivered(&self, message_id: &str) {
        let res = sqlx::query("UPDATE messages SET delivered = 1 WHERE message_id = ?")
            .bind(message_id)
            .execute(&self.pool)
            .await;
        if let Err(e) = res {
            tracing::warn!("mark_delivered failed for {}: {}", message_id, e);
        }
    }

    async fn user_name(&self, user_id: &str) -> Result<Option<String>, ChatError> {
        let name: Option<String> = sqlx::query_scalar("SELECT name FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(name)
    }
}

fn message_from_row(row: &SqliteRow) -> Result<Message, ChatError> {
    let created_at: i64 = row.try_get("created_at")?;
    let delivered: i64 = row.try_get("delivered")?;
    Ok(Message {
        message_id: row.try_get("message_id")?,
        property_id: row.try_get("property_id")?,
        sender_id: row.try_get("sender_id")?,
        sender_name: row.try_get("sender_name")?,
        receiver_id: row.try_get("receiver_id")?,
        receiver_name: row.try_get("receiver_name")?,
        body: row.try_get("body")?,
        created_at: rfc3339_from_micros(created_at),
        delivered: delivered != 0,
    })
}
