use crate::error::{MessagingError, MessagingResult};
use crate::user::UserProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A direct message between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub listing_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

impl Message {
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(&self.sender_id, &self.recipient_id, self.listing_id.as_deref())
    }
}

/// Identifies one conversation: the unordered participant pair, optionally
/// scoped to a listing. Participants are kept sorted so that (A, B) and
/// (B, A) produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationKey {
    pub user_lo: String,
    pub user_hi: String,
    pub listing_id: Option<String>,
}

impl ConversationKey {
    pub fn new(a: &str, b: &str, listing_id: Option<&str>) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self {
            user_lo: lo.to_string(),
            user_hi: hi.to_string(),
            listing_id: listing_id.map(str::to_string),
        }
    }

    /// Non-null form of the listing used for grouping and ordering.
    /// Listing ids are never empty, so "" cannot collide with a real listing.
    pub fn listing_key(&self) -> &str {
        self.listing_id.as_deref().unwrap_or("")
    }

    pub fn includes(&self, user_id: &str) -> bool {
        self.user_lo == user_id || self.user_hi == user_id
    }

    /// The participant that is not `user_id`.
    pub fn counterpart(&self, user_id: &str) -> Option<&str> {
        if self.user_lo == user_id {
            Some(&self.user_hi)
        } else if self.user_hi == user_id {
            Some(&self.user_lo)
        } else {
            None
        }
    }

    pub fn ensure_participant(&self, user_id: &str) -> MessagingResult<()> {
        if self.includes(user_id) {
            Ok(())
        } else {
            Err(MessagingError::Forbidden)
        }
    }
}

/// Conversation row as computed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub key: ConversationKey,
    pub last_message: Message,
    pub unread_count: i64,
}

/// Conversation as presented to one of its participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub participant_ids: [String; 2],
    pub listing_id: Option<String>,
    pub counterpart: UserProfile,
    pub last_message: Message,
    pub unread_count: i64,
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_next_page: bool,
}

pub fn validate_user_id(field: &'static str, user_id: &str) -> MessagingResult<()> {
    if user_id.trim().is_empty() {
        return Err(MessagingError::validation(field, "must not be empty"));
    }
    Ok(())
}

pub fn validate_listing_id(listing_id: Option<&str>) -> MessagingResult<()> {
    match listing_id {
        Some(id) if id.trim().is_empty() => Err(MessagingError::validation(
            "listingId",
            "must not be empty when present",
        )),
        _ => Ok(()),
    }
}

/// Content is opaque text: it only has to be non-blank and within `max_chars`.
pub fn validate_content(content: &str, max_chars: usize) -> MessagingResult<()> {
    if content.trim().is_empty() {
        return Err(MessagingError::validation("content", "must not be empty"));
    }
    let chars = content.chars().count();
    if chars > max_chars {
        return Err(MessagingError::validation(
            "content",
            format!("{} characters exceeds the limit of {}", chars, max_chars),
        ));
    }
    Ok(())
}
