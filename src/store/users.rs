use super::Store;
use crate::{
    error::MessagingResult,
    message::validate_user_id,
    user::{UserDirectory, UserProfile},
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

impl Store {
    /// Save or update a user profile.
    pub async fn save_user(&self, user: &UserProfile) -> MessagingResult<()> {
        validate_user_id("id", &user.id)?;
        validate_user_id("displayName", &user.display_name)?;

        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name
            "#,
        )
        .bind(&user.id)
        .bind(&user.display_name)
        .bind(Utc::now().timestamp_micros())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_user(&self, id: &str) -> MessagingResult<Option<UserProfile>> {
        let row = sqlx::query("SELECT id, display_name FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> MessagingResult<UserProfile> {
            Ok(UserProfile {
                id: row.try_get("id")?,
                display_name: row.try_get("display_name")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl UserDirectory for Store {
    async fn resolve_user(&self, id: &str) -> MessagingResult<Option<UserProfile>> {
        self.find_user(id).await
    }
}
