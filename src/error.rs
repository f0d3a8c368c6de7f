use thiserror::Error;

pub type MessagingResult<T> = Result<T, MessagingError>;

/// Failures surfaced by the messaging core.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// Bad input: empty or oversized content, malformed cursor, empty ids.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// Self-messaging or an unknown participant.
    #[error("invalid participant: {0}")]
    InvalidParticipant(String),

    /// The caller is not a participant of the requested conversation.
    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    /// No authenticated user id was supplied.
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl MessagingError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Whether the failure is a store hiccup worth retrying for idempotent reads.
    pub fn is_transient(&self) -> bool {
        let Self::Store(err) = self else {
            return false;
        };

        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
            // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes
            sqlx::Error::Database(db) => db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| matches!(code & 0xff, 5 | 6))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::InvalidParticipant(_) => "INVALID_PARTICIPANT",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Store(_) => "INTERNAL_ERROR",
        }
    }
}
