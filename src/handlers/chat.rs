//! Conversation and message handlers.
//!
//! Grounded on the teacher's `handlers/create_convo.rs`, `get_convos.rs`,
//! `get_messages.rs` and `send_message.rs` — pagination-by-cursor, a
//! membership check ahead of every mutation, and an
//! `#[tracing::instrument(skip(state))]` per handler.

use axum::extract::{Json, Path, Query, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::extractor::AuthUser;
use crate::authz::{self, Action};
use crate::db;
use crate::error::{AppError, AppResult};
use crate::pubsub::{conversation_channel, BridgeEvent};
use crate::ratelimit::default_quota;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateConversationInput {
    pub participant_ids: Vec<Uuid>,
    #[serde(default)]
    pub sanctum_id: Option<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationOutput {
    pub id: Uuid,
    pub sanctum_id: Option<Uuid>,
    pub kind: String,
    pub title: Option<String>,
}

#[tracing::instrument(skip(state, input))]
pub async fn create_conversation(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(input): Json<CreateConversationInput>,
) -> AppResult<Json<ConversationOutput>> {
    let decision = state
        .rate_limiter
        .allow(
            "create_conversation",
            &auth_user.user_id.to_string(),
            default_quota("create_conversation"),
        )
        .await;
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    if input.participant_ids.is_empty() {
        return Err(AppError::Validation("participant_ids must not be empty".into()));
    }

    for &other in &input.participant_ids {
        if db::is_blocked(&state.db, auth_user.user_id, other).await? {
            return Err(AppError::Forbidden);
        }
    }

    let convo = db::create_conversation(
        &state.db,
        auth_user.user_id,
        &input.participant_ids,
        input.sanctum_id,
        input.title.as_deref(),
    )
    .await?;

    Ok(Json(ConversationOutput {
        id: convo.id,
        sanctum_id: convo.sanctum_id,
        kind: convo.kind,
        title: convo.title,
    }))
}

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub sanctum_id: Option<Uuid>,
    pub kind: String,
    pub title: Option<String>,
    pub unread_count: i64,
    pub last_read_message_id: Option<i64>,
}

#[tracing::instrument(skip(state))]
pub async fn list_conversations(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    let decision = state
        .rate_limiter
        .allow(
            "list_conversations",
            &auth_user.user_id.to_string(),
            default_quota("list_conversations"),
        )
        .await;
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    let rows = db::list_conversations(&state.db, auth_user.user_id).await?;
    Ok(Json(
        rows.into_iter()
            .map(|(convo, participant)| ConversationSummary {
                id: convo.id,
                sanctum_id: convo.sanctum_id,
                kind: convo.kind,
                title: convo.title,
                unread_count: participant.unread_count,
                last_read_message_id: participant.last_read_message_id,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesParams {
    #[serde(default)]
    pub before_id: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MessageOutput {
    pub id: i64,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[tracing::instrument(skip(state, params))]
pub async fn list_messages(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<ListMessagesParams>,
) -> AppResult<Json<Vec<MessageOutput>>> {
    let decision = state
        .rate_limiter
        .allow(
            "list_messages",
            &auth_user.user_id.to_string(),
            default_quota("list_messages"),
        )
        .await;
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    let decision =
        authz::authorize(&state.db, auth_user.user_id, conversation_id, Action::ReadMessages).await?;
    if !decision.is_allowed() {
        return Err(AppError::Forbidden);
    }

    let messages = db::list_messages(&state.db, conversation_id, params.before_id, params.limit)
        .await?;

    Ok(Json(
        messages
            .into_iter()
            .map(|m| MessageOutput {
                id: m.id,
                conversation_id: m.conversation_id,
                sender_id: m.sender_id,
                content: m.content,
                metadata: m.metadata,
                created_at: m.created_at,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageInput {
    pub content: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[tracing::instrument(skip(state, input))]
pub async fn send_message(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Json(input): Json<SendMessageInput>,
) -> AppResult<Json<MessageOutput>> {
    let decision = state
        .rate_limiter
        .allow(
            "send_message",
            &auth_user.user_id.to_string(),
            default_quota("send_message"),
        )
        .await;
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    if input.content.is_empty() || input.content.len() > 8 * 1024 {
        return Err(AppError::Validation(
            "content must be 1-8192 bytes".into(),
        ));
    }

    let decision =
        authz::authorize(&state.db, auth_user.user_id, conversation_id, Action::SendMessage).await?;
    if !decision.is_allowed() {
        return Err(AppError::Forbidden);
    }

    let message = db::send_message(
        &state.db,
        conversation_id,
        auth_user.user_id,
        &input.content,
        input.metadata.clone(),
    )
    .await?;

    let event = BridgeEvent::Message {
        conversation_id,
        message_id: message.id,
        sender_id: auth_user.user_id,
        content: message.content.clone(),
    };
    state
        .pubsub
        .publish(&conversation_channel(conversation_id), event)
        .await;
    // Non-critical: if this fails the sweeper retries the publish later,
    // at worst causing one duplicate delivery rather than a lost message.
    if let Err(err) = db::mark_outbox_published(&state.db, message.id).await {
        tracing::warn!(error = %err, message_id = message.id, "failed to mark outbox row published");
    }

    Ok(Json(MessageOutput {
        id: message.id,
        conversation_id: message.conversation_id,
        sender_id: message.sender_id,
        content: message.content,
        metadata: message.metadata,
        created_at: message.created_at,
    }))
}

/// `up_to_message_id` is optional per §4.8's `mark_read(user_id, conv_id,
/// up_to_id?)`; an absent body (`{}`) marks everything through the latest
/// message.
#[derive(Debug, Deserialize, Default)]
pub struct MarkReadInput {
    #[serde(default)]
    pub up_to_message_id: Option<i64>,
}

#[tracing::instrument(skip(state, input))]
pub async fn mark_read(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Json(input): Json<MarkReadInput>,
) -> AppResult<Json<serde_json::Value>> {
    let decision = state
        .rate_limiter
        .allow(
            "mark_read",
            &auth_user.user_id.to_string(),
            default_quota("mark_read"),
        )
        .await;
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    if !db::is_participant(&state.db, conversation_id, auth_user.user_id).await? {
        return Err(AppError::Forbidden);
    }

    let up_to_message_id = match input.up_to_message_id {
        Some(id) => id,
        None => db::latest_message_id(&state.db, conversation_id).await?.unwrap_or(0),
    };

    db::mark_read(&state.db, conversation_id, auth_user.user_id, up_to_message_id).await?;

    Ok(Json(serde_json::json!({ "ok": true })))
}
