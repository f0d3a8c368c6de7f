use std::sync::Arc;

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequestParts, Json, Path, Query, Request, State,
    },
    http::{request::Parts, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::MessagingError,
    gateway::Gateway,
    message::{Conversation, Message, Page},
    user::UserProfile,
};

/// Header carrying the authenticated user id, set by the fronting auth gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

// -----------------------------------------------------------------------------
// Request / Response Types
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub recipient_id: String,
    pub content: String,
    pub listing_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub display_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
    pub listing_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadQuery {
    pub listing_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadResponse {
    pub updated: u64,
}

// -----------------------------------------------------------------------------
// Identity & Errors
// -----------------------------------------------------------------------------

/// Authenticated caller, taken from the trusted `x-user-id` header.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = MessagingError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| AuthUser(id.to_string()))
            .ok_or(MessagingError::Unauthenticated)
    }
}

impl IntoResponse for MessagingError {
    fn into_response(self) -> Response {
        let status = match &self {
            MessagingError::Validation { .. } | MessagingError::InvalidParticipant(_) => {
                StatusCode::BAD_REQUEST
            }
            MessagingError::Forbidden => StatusCode::FORBIDDEN,
            MessagingError::NotFound(_) => StatusCode::NOT_FOUND,
            MessagingError::Unauthenticated => StatusCode::UNAUTHORIZED,
            MessagingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            MessagingError::Validation { field, reason } => json!({
                "error": self.code(),
                "field": field,
                "message": reason,
            }),
            MessagingError::Store(e) => {
                error!("Store failure while handling request: {}", e);
                json!({ "error": self.code(), "message": "internal error" })
            }
            _ => json!({ "error": self.code(), "message": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for MessagingError {
    fn from(rejection: JsonRejection) -> Self {
        MessagingError::validation("body", rejection.body_text())
    }
}

impl From<QueryRejection> for MessagingError {
    fn from(rejection: QueryRejection) -> Self {
        MessagingError::validation("query", rejection.body_text())
    }
}

// -----------------------------------------------------------------------------
// Server State
// -----------------------------------------------------------------------------

pub struct AppState {
    pub gateway: Gateway,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/users/me", put(register_handler))
        .route("/messages", post(send_message_handler))
        .route("/conversations", get(conversations_handler))
        .route("/conversations/:other_user_id/messages", get(history_handler))
        .route("/conversations/:other_user_id/read", post(mark_read_handler))
        .route("/events", get(events_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request| {
                tracing::info_span!(
                    "http",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %Uuid::new_v4(),
                )
            }),
        )
        .layer(CorsLayer::permissive())
}

// -----------------------------------------------------------------------------
// Handlers
// -----------------------------------------------------------------------------

async fn register_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<UserProfile>, MessagingError> {
    let Json(request) = payload?;
    let profile = UserProfile::new(user_id, request.display_name.trim());
    Ok(Json(state.gateway.register_user(profile).await?))
}

async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), MessagingError> {
    let Json(request) = payload?;
    let message = state
        .gateway
        .send_message(
            &user_id,
            &request.recipient_id,
            &request.content,
            request.listing_id.as_deref(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

async fn conversations_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<Page<Conversation>>, MessagingError> {
    let Query(query) = query?;
    let page = state
        .gateway
        .get_conversations(&user_id, query.cursor.as_deref(), query.limit)
        .await?;
    Ok(Json(page))
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(other_user_id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Page<Message>>, MessagingError> {
    let Query(query) = query?;
    let page = state
        .gateway
        .get_messages(
            &user_id,
            &other_user_id,
            query.listing_id.as_deref(),
            query.cursor.as_deref(),
            query.limit,
        )
        .await?;
    Ok(Json(page))
}

async fn mark_read_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(other_user_id): Path<String>,
    query: Result<Query<ReadQuery>, QueryRejection>,
) -> Result<Json<ReadResponse>, MessagingError> {
    let Query(query) = query?;
    let updated = state
        .gateway
        .mark_read(&user_id, &other_user_id, query.listing_id.as_deref())
        .await?;
    Ok(Json(ReadResponse { updated }))
}

/// Server-sent events for everything that happens in the caller's
/// conversations. Intended for notifiers and live clients.
async fn events_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::BoxError>>> {
    info!("New event stream for {}", user_id);

    let mut rx = state.gateway.bus().subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !event.concerns(&user_id) {
                        continue;
                    }
                    yield SseEvent::default().json_data(&event).map_err(Into::into);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event stream for {} lagged, skipped {} events", user_id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
