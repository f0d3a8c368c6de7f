use crate::{
    bus::{Event, EventBus},
    config::RetryPolicy,
    cursor::{ConversationCursor, MessageCursor},
    error::{MessagingError, MessagingResult},
    message::{
        validate_listing_id, validate_user_id, Conversation, ConversationKey, Message, Page,
    },
    retry::retry_read,
    store::Store,
    user::{UserDirectory, UserProfile},
};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, warn};

/// Client-facing messaging operations.
///
/// Validates callers and participants, owns cursor encoding and page
/// shaping, retries idempotent reads and publishes events after writes.
/// Writes are never retried here.
#[derive(Clone)]
pub struct Gateway {
    store: Store,
    directory: Arc<dyn UserDirectory>,
    bus: Arc<EventBus>,
    retry: RetryPolicy,
}

impl Gateway {
    pub fn new(
        store: Store,
        directory: Arc<dyn UserDirectory>,
        bus: Arc<EventBus>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            directory,
            bus,
            retry,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Register or rename the caller in the identity directory.
    pub async fn register_user(&self, profile: UserProfile) -> MessagingResult<UserProfile> {
        self.store.save_user(&profile).await?;
        info!(user_id = %profile.id, "Registered user {}", profile);
        Ok(profile)
    }

    pub async fn send_message(
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

        if self.directory.resolve_user(sender_id).await?.is_none() {
            return Err(MessagingError::InvalidParticipant(format!(
                "unknown sender {}",
                sender_id
            )));
        }
        if self.directory.resolve_user(recipient_id).await?.is_none() {
            return Err(MessagingError::InvalidParticipant(format!(
                "unknown recipient {}",
                recipient_id
            )));
        }

        let message = self
            .store
            .append(sender_id, recipient_id, content, listing_id)
            .await?;

        info!(
            message_id = message.id,
            sender = %message.sender_id,
            recipient = %message.recipient_id,
            "Message delivered"
        );
        self.bus.publish(Event::MessageSent(message.clone()));

        Ok(message)
    }

    /// The caller's conversations, most recently active first.
    pub async fn get_conversations(
        &self,
        user_id: &str,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> MessagingResult<Page<Conversation>> {
        validate_user_id("userId", user_id)?;
        let cursor = cursor.map(ConversationCursor::decode).transpose()?;
        let limit = i64::from(self.store.limits().page_limit(limit));

        let slice = retry_read(&self.retry, "list_conversations", || {
            self.store
                .list_conversations_for_user(user_id, cursor.as_ref(), limit)
        })
        .await?;

        let next_cursor = if slice.has_more {
            slice
                .conversations
                .last()
                .map(|c| ConversationCursor::after(c).encode())
        } else {
            None
        };

        let mut profiles: HashMap<String, UserProfile> = HashMap::new();
        let mut items = Vec::with_capacity(slice.conversations.len());

        for summary in slice.conversations {
            let other = summary
                .key
                .counterpart(user_id)
                .unwrap_or(&summary.key.user_hi)
                .to_string();

            let counterpart = match profiles.get(&other) {
                Some(profile) => profile.clone(),
                None => {
                    let profile = retry_read(&self.retry, "resolve_user", || {
                        self.directory.resolve_user(&other)
                    })
                    .await?
                    .unwrap_or_else(|| UserProfile::unknown(other.clone()));
                    profiles.insert(other.clone(), profile.clone());
                    profile
                }
            };

            items.push(Conversation {
                participant_ids: [summary.key.user_lo, summary.key.user_hi],
                listing_id: summary.key.listing_id,
                counterpart,
                last_message: summary.last_message,
                unread_count: summary.unread_count,
            });
        }

        Ok(Page {
            has_next_page: next_cursor.is_some(),
            items,
            next_cursor,
        })
    }

    /// One page of history between the caller and `other_user_id`.
    pub async fn get_messages(
        &self,
        user_id: &str,
        other_user_id: &str,
        listing_id: Option<&str>,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> MessagingResult<Page<Message>> {
        let key = self.conversation_key(user_id, other_user_id, listing_id)?;
        self.get_conversation_messages(user_id, &key, cursor, limit)
            .await
    }

    /// One page of a conversation's history, newest page first and
    /// chronological within the page. `next_cursor` continues with older
    /// messages.
    pub async fn get_conversation_messages(
        &self,
        user_id: &str,
        key: &ConversationKey,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> MessagingResult<Page<Message>> {
        if let Err(e) = key.ensure_participant(user_id) {
            warn!(user_id, ?key, "Rejected history request from non-participant");
            return Err(e);
        }

        let cursor = cursor.map(MessageCursor::decode).transpose()?;
        let limit = i64::from(self.store.limits().page_limit(limit));

        let slice = retry_read(&self.retry, "list_messages", || {
            self.store.list_by_conversation(key, cursor, limit)
        })
        .await?;

        let next_cursor = if slice.has_more {
            slice.messages.last().map(|m| MessageCursor::after(m).encode())
        } else {
            None
        };

        let mut items = slice.messages;
        items.reverse();

        Ok(Page {
            has_next_page: next_cursor.is_some(),
            items,
            next_cursor,
        })
    }

    pub async fn mark_read(
        &self,
        user_id: &str,
        other_user_id: &str,
        listing_id: Option<&str>,
    ) -> MessagingResult<u64> {
        let key = self.conversation_key(user_id, other_user_id, listing_id)?;
        self.mark_conversation_read(user_id, &key).await
    }

    pub async fn mark_conversation_read(
        &self,
        user_id: &str,
        key: &ConversationKey,
    ) -> MessagingResult<u64> {
        let updated = match self.store.mark_conversation_read(user_id, key).await {
            Ok(updated) => updated,
            Err(MessagingError::Forbidden) => {
                warn!(user_id, ?key, "Rejected mark-read from non-participant");
                return Err(MessagingError::Forbidden);
            }
            Err(e) => return Err(e),
        };

        if updated > 0 {
            info!(user_id, updated, "Conversation marked read");
            self.bus.publish(Event::ConversationRead {
                viewer_id: user_id.to_string(),
                key: key.clone(),
                updated,
            });
        }

        Ok(updated)
    }

    fn conversation_key(
        &self,
        user_id: &str,
        other_user_id: &str,
        listing_id: Option<&str>,
    ) -> MessagingResult<ConversationKey> {
        validate_user_id("userId", user_id)?;
        validate_user_id("otherUserId", other_user_id)?;
        validate_listing_id(listing_id)?;
        if user_id == other_user_id {
            return Err(MessagingError::InvalidParticipant(
                "a conversation needs two different users".into(),
            ));
        }
        Ok(ConversationKey::new(user_id, other_user_id, listing_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    async fn gateway() -> Gateway {
        let store = Store::in_memory().await.unwrap();
        for (id, name) in [("alice", "Alice's Alpacas"), ("bob", "Bob"), ("carol", "Carol")] {
            store.save_user(&UserProfile::new(id, name)).await.unwrap();
        }
        Gateway::new(
            store.clone(),
            Arc::new(store),
            Arc::new(EventBus::default()),
            RetryPolicy::default(),
        )
    }

    #[tokio::test]
    async fn sent_message_is_last_in_history() {
        let gw = gateway().await;
        gw.send_message("bob", "alice", "earlier", None).await.unwrap();
        let sent = gw.send_message("alice", "bob", "latest", None).await.unwrap();

        let page = gw.get_messages("bob", "alice", None, None, None).await.unwrap();
        assert_eq!(page.items.last(), Some(&sent));
    }

    #[tokio::test]
    async fn pages_are_chronological_and_gapless() {
        let gw = gateway().await;
        let mut sent = Vec::new();
        for i in 0..11 {
            let (from, to) = if i % 3 == 0 { ("bob", "alice") } else { ("alice", "bob") };
            sent.push(gw.send_message(from, to, &format!("#{}", i), None).await.unwrap().id);
        }

        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = gw
                .get_messages("alice", "bob", None, cursor.as_deref(), Some(4))
                .await
                .unwrap();
            // Chronological within a page
            assert!(page.items.windows(2).all(|w| (w[0].created_at, w[0].id) < (w[1].created_at, w[1].id)));
            pages.push(page.items.iter().map(|m| m.id).collect::<Vec<_>>());
            if !page.has_next_page {
                assert!(page.next_cursor.is_none());
                break;
            }
            cursor = page.next_cursor;
        }

        // Newest page first; stitching pages back in reverse restores the history
        let all: Vec<i64> = pages.into_iter().rev().flatten().collect();
        assert_eq!(all, sent);
        assert_eq!(all.iter().collect::<HashSet<_>>().len(), 11);
    }

    #[tokio::test]
    async fn small_conversation_fits_one_page() {
        let gw = gateway().await;
        for text in ["a", "b", "c"] {
            gw.send_message("alice", "bob", text, None).await.unwrap();
        }

        let page = gw.get_messages("alice", "bob", None, None, Some(50)).await.unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(!page.has_next_page);
    }

    #[tokio::test]
    async fn send_validates_participants() {
        let gw = gateway().await;

        assert!(matches!(
            gw.send_message("alice", "alice", "hi", None).await,
            Err(MessagingError::InvalidParticipant(_))
        ));
        assert!(matches!(
            gw.send_message("alice", "nobody", "hi", None).await,
            Err(MessagingError::InvalidParticipant(_))
        ));
        assert!(matches!(
            gw.send_message("ghost", "alice", "hi", None).await,
            Err(MessagingError::InvalidParticipant(_))
        ));
        assert!(matches!(
            gw.send_message("alice", "bob", "", None).await,
            Err(MessagingError::Validation { field: "content", .. })
        ));
    }

    #[tokio::test]
    async fn outsiders_cannot_read_history() {
        let gw = gateway().await;
        gw.send_message("alice", "bob", "secret price", None).await.unwrap();

        let key = ConversationKey::new("alice", "bob", None);
        assert!(matches!(
            gw.get_conversation_messages("carol", &key, None, None).await,
            Err(MessagingError::Forbidden)
        ));
        assert!(matches!(
            gw.mark_conversation_read("carol", &key).await,
            Err(MessagingError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn malformed_cursor_is_rejected() {
        let gw = gateway().await;
        assert!(matches!(
            gw.get_messages("alice", "bob", None, Some("%%%"), None).await,
            Err(MessagingError::Validation { field: "cursor", .. })
        ));
        assert!(matches!(
            gw.get_conversations("alice", Some("%%%"), None).await,
            Err(MessagingError::Validation { field: "cursor", .. })
        ));
    }

    #[tokio::test]
    async fn hello_then_still_there() {
        let gw = gateway().await;

        gw.send_message("alice", "bob", "Hello", None).await.unwrap();
        let page = gw.get_conversations("bob", None, None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].last_message.content, "Hello");
        assert_eq!(page.items[0].unread_count, 1);
        assert_eq!(page.items[0].counterpart.display_name, "Alice's Alpacas");

        assert_eq!(gw.mark_read("bob", "alice", None).await.unwrap(), 1);
        assert_eq!(gw.mark_read("bob", "alice", None).await.unwrap(), 0);
        let page = gw.get_conversations("bob", None, None).await.unwrap();
        assert_eq!(page.items[0].unread_count, 0);

        // Another conversation becomes the most recent one
        gw.send_message("carol", "bob", "Do you sell hay?", None).await.unwrap();
        let page = gw.get_conversations("bob", None, None).await.unwrap();
        assert_eq!(page.items[0].counterpart.id, "carol");

        gw.send_message("alice", "bob", "Still there?", None).await.unwrap();
        let page = gw.get_conversations("bob", None, None).await.unwrap();
        assert_eq!(page.items[0].counterpart.id, "alice");
        assert_eq!(page.items[0].last_message.content, "Still there?");
        assert_eq!(page.items[0].unread_count, 1);
    }

    #[tokio::test]
    async fn unread_count_covers_every_unread_message() {
        let gw = gateway().await;
        for i in 0..5 {
            gw.send_message("alice", "bob", &format!("lot {}", i), Some("sheep-9")).await.unwrap();
        }

        let page = gw.get_conversations("bob", None, None).await.unwrap();
        let convo = &page.items[0];
        assert_eq!(convo.listing_id.as_deref(), Some("sheep-9"));
        assert!(convo.unread_count >= 5);
    }

    #[tokio::test]
    async fn conversation_pages_follow_the_cursor() {
        let gw = gateway().await;
        for other in ["alice", "carol"] {
            gw.send_message(other, "bob", "hi", None).await.unwrap();
        }

        let first = gw.get_conversations("bob", None, Some(1)).await.unwrap();
        assert!(first.has_next_page);
        assert_eq!(first.items[0].counterpart.id, "carol");

        let second = gw
            .get_conversations("bob", first.next_cursor.as_deref(), Some(1))
            .await
            .unwrap();
        assert!(!second.has_next_page);
        assert_eq!(second.items[0].counterpart.id, "alice");
    }

    #[tokio::test]
    async fn writes_publish_events() {
        let gw = gateway().await;
        let mut rx = gw.bus().subscribe();

        gw.send_message("alice", "bob", "Hello", None).await.unwrap();
        gw.mark_read("bob", "alice", None).await.unwrap();
        // A no-op read does not publish
        gw.mark_read("bob", "alice", None).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), Event::MessageSent(_)));
        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::ConversationRead { updated: 1, .. }
        ));
        assert!(rx.try_recv().is_err());
    }
}
