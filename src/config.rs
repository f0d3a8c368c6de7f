use anyhow::{Context, Result};
use std::{path::PathBuf, str::FromStr, time::Duration};

const DEFAULT_BIND: &str = "0.0.0.0:3000";
const DEFAULT_MAX_CONTENT_CHARS: usize = 4096;
const DEFAULT_PAGE_LIMIT: u32 = 50;
const DEFAULT_MAX_PAGE_LIMIT: u32 = 100;
const DEFAULT_MAX_CONVERSATION_MESSAGES: i64 = 100_000;
const DEFAULT_READ_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 50;
const DEFAULT_EVENT_BUFFER: usize = 100;

/// Runtime configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub db_path: PathBuf,
    pub bind_addr: String,
    pub limits: Limits,
    pub retry: RetryPolicy,
    pub event_buffer: usize,
}

/// Bounds applied to message content, page sizes and conversation history.
#[derive(Clone, Debug)]
pub struct Limits {
    pub max_content_chars: usize,
    pub default_page_limit: u32,
    pub max_page_limit: u32,
    /// Upper bound on the number of messages kept in one conversation.
    pub max_conversation_messages: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            default_page_limit: DEFAULT_PAGE_LIMIT,
            max_page_limit: DEFAULT_MAX_PAGE_LIMIT,
            max_conversation_messages: DEFAULT_MAX_CONVERSATION_MESSAGES,
        }
    }
}

impl Limits {
    /// Resolve a requested page size. Missing values use the default,
    /// out-of-range values are clamped into `1..=max_page_limit`.
    pub fn page_limit(&self, requested: Option<i64>) -> u32 {
        let max = self.max_page_limit.max(1);
        match requested {
            None => self.default_page_limit.clamp(1, max),
            Some(n) => n.clamp(1, i64::from(max)) as u32,
        }
    }
}

/// Retry policy for idempotent reads against the store.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_READ_RETRY_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

impl Config {
    /// Build the configuration from `PADDOCK_*` environment variables.
    /// Unset variables fall back to defaults; unparsable ones are an error.
    pub fn from_env() -> Result<Self> {
        let db_path = match std::env::var("PADDOCK_DB_PATH") {
            Ok(path) => PathBuf::from(path),
            Err(_) => {
                // We use ~/.paddock/paddock.db
                let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".into());
                PathBuf::from(home_dir).join(".paddock").join("paddock.db")
            }
        };

        let limits = Limits {
            max_content_chars: env_or("PADDOCK_MAX_CONTENT_CHARS", DEFAULT_MAX_CONTENT_CHARS)?,
            default_page_limit: env_or("PADDOCK_DEFAULT_PAGE_LIMIT", DEFAULT_PAGE_LIMIT)?,
            max_page_limit: env_or("PADDOCK_MAX_PAGE_LIMIT", DEFAULT_MAX_PAGE_LIMIT)?,
            max_conversation_messages: env_or(
                "PADDOCK_MAX_CONVERSATION_MESSAGES",
                DEFAULT_MAX_CONVERSATION_MESSAGES,
            )?,
        };

        if limits.max_page_limit == 0 {
            anyhow::bail!("PADDOCK_MAX_PAGE_LIMIT must be at least 1");
        }
        if limits.max_content_chars == 0 {
            anyhow::bail!("PADDOCK_MAX_CONTENT_CHARS must be at least 1");
        }

        let retry = RetryPolicy {
            attempts: env_or("PADDOCK_READ_RETRY_ATTEMPTS", DEFAULT_READ_RETRY_ATTEMPTS)?.max(1),
            initial_backoff: Duration::from_millis(env_or(
                "PADDOCK_RETRY_BACKOFF_MS",
                DEFAULT_RETRY_BACKOFF_MS,
            )?),
        };

        Ok(Self {
            db_path,
            bind_addr: std::env::var("PADDOCK_BIND").unwrap_or_else(|_| DEFAULT_BIND.into()),
            limits,
            retry,
            event_buffer: env_or("PADDOCK_EVENT_BUFFER", DEFAULT_EVENT_BUFFER)?.max(1),
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}
