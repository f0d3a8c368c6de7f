use crate::{
    fetch::PageSource,
    http::{ReadResponse, USER_ID_HEADER},
    message::{Conversation, Message, Page},
};
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid base url: {0}")]
    InvalidUrl(String),
}

/// Thin client for the messaging HTTP API, acting as one user.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    user_id: String,
}

impl ApiClient {
    pub fn new(base_url: impl AsRef<str>, user_id: impl Into<String>) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url.as_ref())
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base_url.as_ref(), e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url,
            user_id: user_id.into(),
        })
    }

    pub async fn send_message(
        &self,
        recipient_id: &str,
        content: &str,
        listing_id: Option<&str>,
    ) -> Result<Message, ClientError> {
        let request = self
            .http
            .post(self.endpoint(["messages"])?)
            .header(USER_ID_HEADER, &self.user_id)
            .json(&json!({
                "recipientId": recipient_id,
                "content": content,
                "listingId": listing_id,
            }));
        decode(request.send().await?).await
    }

    pub async fn conversations(
        &self,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Page<Conversation>, ClientError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let request = self
            .http
            .get(self.endpoint(["conversations"])?)
            .header(USER_ID_HEADER, &self.user_id)
            .query(&query);
        decode(request.send().await?).await
    }

    pub async fn messages(
        &self,
        other_user_id: &str,
        listing_id: Option<&str>,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Page<Message>, ClientError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(listing_id) = listing_id {
            query.push(("listingId", listing_id.to_string()));
        }
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let request = self
            .http
            .get(self.endpoint(["conversations", other_user_id, "messages"])?)
            .header(USER_ID_HEADER, &self.user_id)
            .query(&query);
        decode(request.send().await?).await
    }

    pub async fn mark_read(
        &self,
        other_user_id: &str,
        listing_id: Option<&str>,
    ) -> Result<u64, ClientError> {
        let mut request = self
            .http
            .post(self.endpoint(["conversations", other_user_id, "read"])?)
            .header(USER_ID_HEADER, &self.user_id);
        if let Some(listing_id) = listing_id {
            request = request.query(&[("listingId", listing_id)]);
        }

        let response: ReadResponse = decode(request.send().await?).await?;
        Ok(response.updated)
    }

    /// Resolve an API path below the base url. Each segment is
    /// percent-encoded, so opaque user ids survive intact.
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Page source over one conversation's history, for a `HistoryFeed`.
    pub fn history(&self, other_user_id: impl Into<String>, listing_id: Option<String>) -> ConversationHistory {
        ConversationHistory {
            client: self.clone(),
            other_user_id: other_user_id.into(),
            listing_id,
            page_size: None,
        }
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}

/// History of the conversation with one counterpart, fetched page by page.
#[derive(Clone, Debug)]
pub struct ConversationHistory {
    client: ApiClient,
    other_user_id: String,
    listing_id: Option<String>,
    page_size: Option<u32>,
}

impl ConversationHistory {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

#[async_trait(?Send)]
impl PageSource for ConversationHistory {
    type Item = Message;
    type Error = ClientError;

    async fn fetch_page(&self, cursor: Option<String>) -> Result<Page<Message>, ClientError> {
        self.client
            .messages(
                &self.other_user_id,
                self.listing_id.as_deref(),
                cursor.as_deref(),
                self.page_size,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_ids_are_escaped_as_single_segments() {
        let client = ApiClient::new("http://localhost:8080/api/", "alice").unwrap();

        let url = client
            .endpoint(["conversations", "bob#2/x?y%z", "messages"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/conversations/bob%232%2Fx%3Fy%25z/messages"
        );
        assert_eq!(url.fragment(), None);
        assert_eq!(url.query(), None);
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(matches!(
            ApiClient::new("not a url", "alice"),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(matches!(
            ApiClient::new("mailto:alice@example.com", "alice"),
            Err(ClientError::InvalidUrl(_))
        ));
    }
}
