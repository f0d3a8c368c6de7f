use super::{message_from_row, Store, MESSAGE_COLUMNS};
use crate::{
    cursor::MessageCursor,
    error::{MessagingError, MessagingResult},
    message::{validate_content, validate_listing_id, validate_user_id, ConversationKey, Message},
};
use chrono::Utc;
use tracing::debug;

/// Newest-first slice of a conversation's history.
#[derive(Debug, Clone)]
pub struct HistorySlice {
    pub messages: Vec<Message>,
    /// Whether older messages exist beyond this slice.
    pub has_more: bool,
}

impl Store {
    /// Append a message to its conversation.
    ///
    /// The id comes from the AUTOINCREMENT rowid and `created_at` is the
    /// wall clock, bumped past the newest stored timestamp when needed, so
    /// both keys strictly increase with insertion order. The history bound
    /// is checked in the same statement as the insert, against the
    /// trigger-maintained `conversation_counts` row.
    pub async fn append(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
        listing_id: Option<&str>,
    ) -> MessagingResult<Message> {
        validate_user_id("senderId", sender_id)?;
        validate_user_id("recipientId", recipient_id)?;
        if sender_id == recipient_id {
            return Err(MessagingError::InvalidParticipant(
                "cannot send a message to yourself".into(),
            ));
        }
        validate_content(content, self.limits.max_content_chars)?;
        validate_listing_id(listing_id)?;

        let key = ConversationKey::new(sender_id, recipient_id, listing_id);
        let sql = format!(
            r#"
            INSERT INTO messages
                (sender_id, recipient_id, user_lo, user_hi, listing_key, listing_id, content, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                MAX(?8, COALESCE((SELECT created_at + 1 FROM messages ORDER BY id DESC LIMIT 1), 0))
            WHERE COALESCE((
                SELECT message_count FROM conversation_counts
                WHERE user_lo = ?3 AND user_hi = ?4 AND listing_key = ?5
            ), 0) < ?9
            RETURNING {}
            "#,
            MESSAGE_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(sender_id)
            .bind(recipient_id)
            .bind(&key.user_lo)
            .bind(&key.user_hi)
            .bind(key.listing_key())
            .bind(listing_id)
            .bind(content)
            .bind(Utc::now().timestamp_micros())
            .bind(self.limits.max_conversation_messages)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Err(MessagingError::validation(
                "conversation",
                format!(
                    "conversation already holds the maximum of {} messages",
                    self.limits.max_conversation_messages
                ),
            ));
        };

        let message = message_from_row(&row)?;
        debug!(message_id = message.id, "Appended message");
        Ok(message)
    }

    pub async fn get_by_id(&self, id: i64) -> MessagingResult<Message> {
        let sql = format!("SELECT {} FROM messages WHERE id = ?", MESSAGE_COLUMNS);

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MessagingError::NotFound(format!("message {}", id)))?;

        message_from_row(&row)
    }

    /// Retrieve one page of a conversation, newest first.
    /// Only messages strictly older than `cursor` in (created_at, id) order
    /// are returned. `limit` is clamped to the configured page bounds.
    pub async fn list_by_conversation(
        &self,
        key: &ConversationKey,
        cursor: Option<MessageCursor>,
        limit: i64,
    ) -> MessagingResult<HistorySlice> {
        let limit = self.limits.page_limit(Some(limit)) as usize;
        let before = cursor.unwrap_or(MessageCursor {
            created_at_us: i64::MAX,
            id: i64::MAX,
        });

        let sql = format!(
            r#"
            SELECT {}
            FROM messages
            WHERE user_lo = ?1 AND user_hi = ?2 AND listing_key = ?3
              AND (created_at < ?4 OR (created_at = ?4 AND id < ?5))
            ORDER BY created_at DESC, id DESC
            LIMIT ?6
            "#,
            MESSAGE_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(&key.user_lo)
            .bind(&key.user_hi)
            .bind(key.listing_key())
            .bind(before.created_at_us)
            .bind(before.id)
            // One extra row tells us whether another page exists
            .bind(limit as i64 + 1)
            .fetch_all(&self.pool)
            .await?;

        let has_more = rows.len() > limit;
        let messages = rows
            .iter()
            .take(limit)
            .map(message_from_row)
            .collect::<MessagingResult<Vec<_>>>()?;

        Ok(HistorySlice { messages, has_more })
    }
}
