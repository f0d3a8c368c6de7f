use super::Store;
use crate::{error::MessagingResult, message::ConversationKey};

impl Store {
    /// Mark every unread message addressed to `viewer_id` in the conversation
    /// as read and return how many rows changed.
    ///
    /// A single UPDATE, so SQLite applies it atomically: a message appended
    /// concurrently lands either before the update (and is marked) or after
    /// it (and stays unread). Messages the viewer sent are never touched.
    pub async fn mark_conversation_read(
        &self,
        viewer_id: &str,
        key: &ConversationKey,
    ) -> MessagingResult<u64> {
        key.ensure_participant(viewer_id)?;

        let result = sqlx::query(
            r#"
            UPDATE messages
            SET is_read = 1
            WHERE user_lo = ? AND user_hi = ? AND listing_key = ?
              AND recipient_id = ?
              AND is_read = 0
            "#,
        )
        .bind(&key.user_lo)
        .bind(&key.user_hi)
        .bind(key.listing_key())
        .bind(viewer_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
