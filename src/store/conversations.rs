use super::{message_from_row, Store};
use crate::{
    cursor::ConversationCursor,
    error::MessagingResult,
    message::{ConversationKey, ConversationSummary},
};
use sqlx::Row;

/// Conversations of one user, most recently active first.
#[derive(Debug, Clone)]
pub struct ConversationSlice {
    pub conversations: Vec<ConversationSummary>,
    pub has_more: bool,
}

impl Store {
    /// Group every message the user sent or received by conversation key,
    /// keeping the newest message and the viewer's unread count per group.
    ///
    /// Nothing is cached: the index is recomputed from the messages table on
    /// every call. Ordering is (last message created_at, key) descending and
    /// `cursor` selects the groups strictly below the given position.
    pub async fn list_conversations_for_user(
        &self,
        user_id: &str,
        cursor: Option<&ConversationCursor>,
        limit: i64,
    ) -> MessagingResult<ConversationSlice> {
        let limit = self.limits.page_limit(Some(limit)) as usize;

        let (before_t, before_lo, before_hi, before_listing) = match cursor {
            Some(c) => (
                c.created_at_us,
                c.user_lo.as_str(),
                c.user_hi.as_str(),
                c.listing_key.as_str(),
            ),
            None => (i64::MAX, "", "", ""),
        };

        let rows = sqlx::query(
            r#"
            WITH mine AS (
                SELECT
                    id, sender_id, recipient_id, user_lo, user_hi, listing_key, listing_id,
                    content, created_at, is_read,
                    ROW_NUMBER() OVER (
                        PARTITION BY user_lo, user_hi, listing_key
                        ORDER BY created_at DESC, id DESC
                    ) AS rn,
                    SUM(CASE WHEN recipient_id = ?1 AND is_read = 0 THEN 1 ELSE 0 END) OVER (
                        PARTITION BY user_lo, user_hi, listing_key
                    ) AS unread_count
                FROM messages
                WHERE sender_id = ?1 OR recipient_id = ?1
            )
            SELECT id, sender_id, recipient_id, user_lo, user_hi, listing_id,
                   content, created_at, is_read, unread_count
            FROM mine
            WHERE rn = 1
              AND (created_at, user_lo, user_hi, listing_key) < (?2, ?3, ?4, ?5)
            ORDER BY created_at DESC, user_lo DESC, user_hi DESC, listing_key DESC
            LIMIT ?6
            "#,
        )
        .bind(user_id)
        .bind(before_t)
        .bind(before_lo)
        .bind(before_hi)
        .bind(before_listing)
        .bind(limit as i64 + 1)
        .fetch_all(&self.pool)
        .await?;

        let has_more = rows.len() > limit;
        let mut conversations = Vec::with_capacity(rows.len().min(limit));

        for row in rows.iter().take(limit) {
            let last_message = message_from_row(row)?;
            let key = ConversationKey {
                user_lo: row.try_get("user_lo")?,
                user_hi: row.try_get("user_hi")?,
                listing_id: last_message.listing_id.clone(),
            };

            conversations.push(ConversationSummary {
                key,
                last_message,
                unread_count: row.try_get("unread_count")?,
            });
        }

        Ok(ConversationSlice {
            conversations,
            has_more,
        })
    }
}
