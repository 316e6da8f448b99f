//! Chatroom moderation handlers: granting moderator status and removing
//! participants, both gated by [`authz::can_manage_moderators`].
//!
//! Grounded on the teacher's `handlers/promote_moderator.rs` /
//! `remove_member.rs` request shape, adapted from MLS-group membership
//! commits to plain `participants` row mutation.

use axum::extract::{Json, Path, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::extractor::AuthUser;
use crate::authz;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::ratelimit::default_quota;
use crate::state::AppState;

async fn check_admin_mutation_quota(state: &AppState, auth_user: &AuthUser) -> AppResult<()> {
    let decision = state
        .rate_limiter
        .allow(
            "admin_mutation",
            &auth_user.user_id.to_string(),
            default_quota("admin_mutation"),
        )
        .await;
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ModeratorOutput {
    pub user_id: Uuid,
    pub granted_at: chrono::DateTime<chrono::Utc>,
    pub granted_by: Uuid,
}

#[tracing::instrument(skip(state))]
pub async fn list_moderators(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Vec<ModeratorOutput>>> {
    if !db::is_participant(&state.db, conversation_id, auth_user.user_id).await? {
        return Err(AppError::Forbidden);
    }

    let moderators = db::list_chatroom_moderators(&state.db, conversation_id).await?;
    Ok(Json(
        moderators
            .into_iter()
            .map(|m| ModeratorOutput {
                user_id: m.user_id,
                granted_at: m.granted_at,
                granted_by: m.granted_by,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct GrantModeratorInput {
    pub user_id: Uuid,
}

#[tracing::instrument(skip(state, input))]
pub async fn grant_moderator(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Json(input): Json<GrantModeratorInput>,
) -> AppResult<Json<serde_json::Value>> {
    check_admin_mutation_quota(&state, &auth_user).await?;

    if !authz::can_manage_moderators(&state.db, auth_user.user_id, conversation_id).await? {
        return Err(AppError::Forbidden);
    }
    if !db::is_participant(&state.db, conversation_id, input.user_id).await? {
        return Err(AppError::Validation(
            "target user is not a participant of this conversation".into(),
        ));
    }

    db::grant_chatroom_moderator(&state.db, conversation_id, input.user_id, auth_user.user_id).await?;

    Ok(Json(serde_json::json!({ "ok": true })))
}

#[tracing::instrument(skip(state))]
pub async fn revoke_moderator(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<serde_json::Value>> {
    check_admin_mutation_quota(&state, &auth_user).await?;

    if !authz::can_manage_moderators(&state.db, auth_user.user_id, conversation_id).await? {
        return Err(AppError::Forbidden);
    }

    db::revoke_chatroom_moderator(&state.db, conversation_id, user_id).await?;

    Ok(Json(serde_json::json!({ "ok": true })))
}

#[tracing::instrument(skip(state))]
pub async fn remove_participant(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<serde_json::Value>> {
    check_admin_mutation_quota(&state, &auth_user).await?;

    let decision = authz::authorize(
        &state.db,
        auth_user.user_id,
        conversation_id,
        authz::Action::RemoveParticipant,
    )
    .await?;
    if !decision.is_allowed() {
        return Err(AppError::Forbidden);
    }

    db::remove_participant(&state.db, conversation_id, user_id).await?;

    state.chat_hub.leave_all(conversation_id, user_id);

    Ok(Json(serde_json::json!({ "ok": true })))
}
