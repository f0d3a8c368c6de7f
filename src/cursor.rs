//! Opaque pagination cursors.
//!
//! A cursor is the ordering key of the last row a client has seen, serialised
//! as JSON and wrapped in URL-safe base64 so clients never depend on its shape.
//! The next page holds the rows strictly below it in descending order.

use crate::error::{MessagingError, MessagingResult};
use crate::message::{ConversationKey, ConversationSummary, Message};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "k")]
enum Token {
    #[serde(rename = "m")]
    Message { t: i64, id: i64 },
    #[serde(rename = "c")]
    Conversation { t: i64, lo: String, hi: String, l: String },
}

/// Position in a conversation's history: (created_at micros, id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MessageCursor {
    pub created_at_us: i64,
    pub id: i64,
}

impl MessageCursor {
    pub fn after(message: &Message) -> Self {
        Self {
            created_at_us: message.created_at.timestamp_micros(),
            id: message.id,
        }
    }

    pub fn encode(&self) -> String {
        encode(&Token::Message {
            t: self.created_at_us,
            id: self.id,
        })
    }

    pub fn decode(raw: &str) -> MessagingResult<Self> {
        match decode(raw)? {
            Token::Message { t, id } => Ok(Self {
                created_at_us: t,
                id,
            }),
            Token::Conversation { .. } => Err(wrong_kind()),
        }
    }
}

/// Position in a user's conversation list:
/// (last message created_at micros, conversation key).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationCursor {
    pub created_at_us: i64,
    pub user_lo: String,
    pub user_hi: String,
    pub listing_key: String,
}

impl ConversationCursor {
    pub fn after(summary: &ConversationSummary) -> Self {
        Self::from_parts(summary.last_message.created_at.timestamp_micros(), &summary.key)
    }

    fn from_parts(created_at_us: i64, key: &ConversationKey) -> Self {
        Self {
            created_at_us,
            user_lo: key.user_lo.clone(),
            user_hi: key.user_hi.clone(),
            listing_key: key.listing_key().to_string(),
        }
    }

    pub fn encode(&self) -> String {
        encode(&Token::Conversation {
            t: self.created_at_us,
            lo: self.user_lo.clone(),
            hi: self.user_hi.clone(),
            l: self.listing_key.clone(),
        })
    }

    pub fn decode(raw: &str) -> MessagingResult<Self> {
        match decode(raw)? {
            Token::Conversation { t, lo, hi, l } => Ok(Self {
                created_at_us: t,
                user_lo: lo,
                user_hi: hi,
                listing_key: l,
            }),
            Token::Message { .. } => Err(wrong_kind()),
        }
    }
}

fn encode(token: &Token) -> String {
    // Serialising a plain struct of strings and integers cannot fail
    let json = serde_json::to_vec(token).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

fn decode(raw: &str) -> MessagingResult<Token> {
    let bytes = URL_SAFE_NO_PAD
        .decode(raw.trim())
        .map_err(|_| MessagingError::validation("cursor", "malformed cursor"))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| MessagingError::validation("cursor", "malformed cursor"))
}

fn wrong_kind() -> MessagingError {
    MessagingError::validation("cursor", "cursor does not belong to this listing")
}
