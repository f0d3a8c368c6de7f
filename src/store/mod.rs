mod conversations;
mod messages;
mod read_state;
mod users;

pub use conversations::ConversationSlice;
pub use messages::HistorySlice;

use crate::{
    config::Limits,
    error::{MessagingError, MessagingResult},
    message::Message,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    ConnectOptions, Row, SqlitePool,
};
use std::{path::Path, str::FromStr, time::Duration};

/// Columns selected whenever a full message row is read back.
const MESSAGE_COLUMNS: &str =
    "id, sender_id, recipient_id, listing_id, content, created_at, is_read";

/// Durable message store backed by SQLite.
///
/// Holds only the connection pool and the configured limits; every
/// operation is a self-contained statement, so one `Store` is shared by
/// all request handlers.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
    limits: Limits,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self {
            pool,
            limits: Limits::default(),
        })
    }

    /// Private in-memory database, used by tests and throwaway instances.
    /// A single connection keeps every query on the same database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;

        let store = Self {
            pool,
            limits: Limits::default(),
        };
        store.init().await?;
        Ok(store)
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                user_lo TEXT NOT NULL,
                user_hi TEXT NOT NULL,
                listing_key TEXT NOT NULL,
                listing_id TEXT,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                CHECK (sender_id <> recipient_id)
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(user_lo, user_hi, listing_key, created_at DESC, id DESC);
            CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id);
            CREATE INDEX IF NOT EXISTS idx_messages_recipient_unread ON messages(recipient_id, is_read);

            -- Per-conversation message counts, so the history bound is a
            -- single key lookup on insert
            CREATE TABLE IF NOT EXISTS conversation_counts (
                user_lo TEXT NOT NULL,
                user_hi TEXT NOT NULL,
                listing_key TEXT NOT NULL,
                message_count INTEGER NOT NULL,
                PRIMARY KEY (user_lo, user_hi, listing_key)
            );
            INSERT OR IGNORE INTO conversation_counts (user_lo, user_hi, listing_key, message_count)
                SELECT user_lo, user_hi, listing_key, COUNT(*) FROM messages
                GROUP BY user_lo, user_hi, listing_key;
            CREATE TRIGGER IF NOT EXISTS trg_messages_count AFTER INSERT ON messages
            BEGIN
                INSERT OR IGNORE INTO conversation_counts (user_lo, user_hi, listing_key, message_count)
                    VALUES (NEW.user_lo, NEW.user_hi, NEW.listing_key, 0);
                UPDATE conversation_counts SET message_count = message_count + 1
                    WHERE user_lo = NEW.user_lo AND user_hi = NEW.user_hi AND listing_key = NEW.listing_key;
            END;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }
}

fn message_from_row(row: &SqliteRow) -> MessagingResult<Message> {
    let created_at_us: i64 = row.try_get("created_at")?;

    Ok(Message {
        id: row.try_get("id")?,
        sender_id: row.try_get("sender_id")?,
        recipient_id: row.try_get("recipient_id")?,
        content: row.try_get("content")?,
        listing_id: row.try_get("listing_id")?,
        created_at: from_micros(created_at_us)?,
        is_read: row.try_get("is_read")?,
    })
}

fn from_micros(us: i64) -> MessagingResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us).ok_or_else(|| {
        MessagingError::Store(sqlx::Error::Decode(
            format!("timestamp out of range: {}", us).into(),
        ))
    })
}
