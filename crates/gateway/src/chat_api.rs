//! Route handlers and DTOs.
//!
//! Envelope routes return `{ code, message, data }` with `code` mirroring
//! the HTTP status. `POST /chat/generate` returns a raw SSE stream whose
//! frame names are the event tags (`text-delta`, `reasoning-delta`,
//! `source`, `finish`, `error`).

use std::convert::Infallible;

use axum::{
    Extension,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    response::sse::{Event as SseEvent, Sse},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use chatrelay_chat::GenerationSession;
use chatrelay_core::{
    Conversation, ConversationId, ConversationStats, DailyUsage, Error, Message, ModelKind,
    ModelUsage, TopConversation, UsageOverview,
};

use crate::{AuthedUser, SharedState};

// ── Envelope ──────────────────────────────────────────────────────────────

/// The non-streaming response envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

type ApiError = (StatusCode, Json<Envelope<serde_json::Value>>);

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        code: 200,
        message: "ok".into(),
        data: Some(data),
    })
}

fn fail(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(Envelope {
            code: status.as_u16(),
            message: message.into(),
            data: None,
        }),
    )
}

/// Map a pipeline error to its pre-stream HTTP response.
fn pipeline_error(err: Error) -> ApiError {
    match &err {
        Error::InvalidConversation(_) => fail(StatusCode::NOT_FOUND, err.to_string()),
        Error::Backend(chatrelay_core::BackendError::NotConfigured(_)) => {
            fail(StatusCode::BAD_REQUEST, err.to_string())
        }
        Error::Backend(_) => fail(StatusCode::BAD_GATEWAY, err.to_string()),
        _ => fail(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

// ── DTOs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UiMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub conversation_id: String,
    pub model_type: ModelKind,
    #[serde(default)]
    pub messages: Vec<UiMessage>,
    #[serde(default)]
    pub regenerate: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}
fn default_page_size() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    30
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    10
}

#[derive(Debug, Serialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

// ── Streaming ─────────────────────────────────────────────────────────────

/// `POST /chat/generate` — run one generation turn, stream SSE frames.
///
/// Anonymous callers are accepted; their turns persist the message but
/// skip the usage record.
pub async fn generate_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<GenerateRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let user_id = state.resolve_user(&headers);
    info!(
        conversation = %payload.conversation_id,
        model = %payload.model_type,
        regenerate = payload.regenerate,
        anonymous = user_id.is_none(),
        "chat/generate request"
    );

    // The newest user turn in the posted transcript is the new message
    let new_message = payload
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .unwrap_or_default();

    if !payload.regenerate && new_message.is_empty() {
        return Err(fail(StatusCode::BAD_REQUEST, "no user message in request"));
    }

    let session = GenerationSession {
        conversation_id: ConversationId::from(&payload.conversation_id),
        user_id,
        kind: payload.model_type,
        regenerate: payload.regenerate,
    };

    let live = state
        .pipeline
        .generate(session, new_message)
        .await
        .map_err(pipeline_error)?;

    // Dropping `live.completion` detaches it; assembly and persistence
    // keep running even if this response is abandoned
    let stream = ReceiverStream::new(live.events).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event.frame_name()).data(data))
    });

    Ok(Sse::new(stream))
}

// ── Conversation CRUD ─────────────────────────────────────────────────────

/// `POST /conversation`
pub async fn create_conversation_handler(
    State(state): State<SharedState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<Json<Envelope<Conversation>>, ApiError> {
    let conversation = state
        .history
        .create_conversation(&user_id, payload.title)
        .await
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(ok(conversation))
}

/// `GET /conversation?page=&page_size=`
pub async fn list_conversations_handler(
    State(state): State<SharedState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Envelope<chatrelay_core::ConversationPage>>, ApiError> {
    let page = state
        .history
        .list_conversations(&user_id, query.page, query.page_size)
        .await
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(ok(page))
}

/// `GET /conversation/{id}` — conversation plus ordered messages.
pub async fn get_conversation_handler(
    State(state): State<SharedState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<ConversationDetail>>, ApiError> {
    let conversation_id = ConversationId::from(&id);
    let conversation = state
        .history
        .resolve_conversation(&conversation_id)
        .await
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .filter(|c| c.user_id == user_id)
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "conversation not found"))?;

    let messages = state
        .history
        .list_messages(&conversation_id)
        .await
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(ok(ConversationDetail {
        conversation,
        messages,
    }))
}

/// `DELETE /conversation/{id}`
pub async fn delete_conversation_handler(
    State(state): State<SharedState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<bool>>, ApiError> {
    let conversation_id = ConversationId::from(&id);
    let owned = state
        .history
        .resolve_conversation(&conversation_id)
        .await
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .is_some_and(|c| c.user_id == user_id);

    if !owned {
        return Err(fail(StatusCode::NOT_FOUND, "conversation not found"));
    }

    let deleted = state
        .history
        .delete_conversation(&conversation_id)
        .await
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(ok(deleted))
}

// ── Statistics ────────────────────────────────────────────────────────────

/// `GET /statistics/overview`
pub async fn overview_handler(
    State(state): State<SharedState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
) -> Result<Json<Envelope<UsageOverview>>, ApiError> {
    let overview = state
        .usage
        .overview(&user_id)
        .await
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(ok(overview))
}

/// `GET /statistics/usage/daily?days=30`
pub async fn daily_usage_handler(
    State(state): State<SharedState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<Envelope<Vec<DailyUsage>>>, ApiError> {
    let daily = state
        .usage
        .daily_usage(&user_id, query.days)
        .await
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(ok(daily))
}

/// `GET /statistics/usage/by-model`
pub async fn usage_by_model_handler(
    State(state): State<SharedState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
) -> Result<Json<Envelope<Vec<ModelUsage>>>, ApiError> {
    let models = state
        .usage
        .usage_by_model(&user_id)
        .await
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(ok(models))
}

/// `GET /statistics/conversation/{id}`
pub async fn conversation_stats_handler(
    State(state): State<SharedState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<ConversationStats>>, ApiError> {
    let conversation_id = ConversationId::from(&id);
    let owned = state
        .history
        .resolve_conversation(&conversation_id)
        .await
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .is_some_and(|c| c.user_id == user_id);

    if !owned {
        return Err(fail(StatusCode::NOT_FOUND, "conversation not found"));
    }

    let stats = state
        .usage
        .conversation_stats(&conversation_id)
        .await
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(ok(stats))
}

/// `GET /statistics/top-conversations?limit=10`
pub async fn top_conversations_handler(
    State(state): State<SharedState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Envelope<Vec<TopConversation>>>, ApiError> {
    let ranked = state
        .usage
        .top_conversations(&user_id, query.limit)
        .await
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(ok(ranked))
}
