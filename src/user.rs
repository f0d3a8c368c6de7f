use crate::error::MessagingResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Public profile of a marketplace user, as known to the identity directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// Placeholder used when the directory has no record for an id.
    pub fn unknown(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
        }
    }
}

impl fmt::Display for UserProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// Identity collaborator: resolves opaque user ids to profiles.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve_user(&self, id: &str) -> MessagingResult<Option<UserProfile>>;
}
