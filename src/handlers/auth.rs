//! Session handlers: signup, login, refresh rotation, logout, and minting
//! single-use WebSocket tickets.
//!
//! Request/response shapes follow the teacher's `handlers/subscription_ticket.rs`
//! convention of a dedicated `*Input`/`*Output` struct per endpoint; the
//! ES256/DID-based session issuance is replaced with [`crate::auth::tokens`].

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::extractor::AuthUser;
use crate::auth::ticket::TicketClaims;
use crate::auth::tokens::TokenSubject;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::ratelimit::default_quota;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignupInput {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionOutput {
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_in: i64,
    pub refresh_expires_in: i64,
}

#[tracing::instrument(skip(state, input))]
pub async fn signup(
    State(state): State<AppState>,
    Json(input): Json<SignupInput>,
) -> AppResult<Json<SessionOutput>> {
    let decision = state
        .rate_limiter
        .allow("signup", &input.username, default_quota("signup"))
        .await;
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    if input.username.trim().is_empty() || input.password.len() < 8 {
        return Err(AppError::Validation(
            "username required, password must be at least 8 characters".into(),
        ));
    }

    let password_hash =
        crate::crypto::hash_password(&input.password).map_err(AppError::internal)?;
    let user = db::create_user(&state.db, &input.username, &input.email, &password_hash).await?;

    let issued = state
        .tokens
        .issue(TokenSubject {
            user_id: user.id,
            is_admin: user.is_master_admin,
        })
        .await?;

    Ok(Json(SessionOutput {
        user_id: user.id,
        access_token: issued.access_token,
        refresh_token: issued.refresh_token,
        access_expires_in: issued.access_expires_in,
        refresh_expires_in: issued.refresh_expires_in,
    }))
}

#[tracing::instrument(skip(state, input))]
pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginInput>,
) -> AppResult<Json<SessionOutput>> {
    let decision = state
        .rate_limiter
        .allow("login", &input.username, default_quota("login"))
        .await;
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    let user = db::find_user_by_username(&state.db, &input.username)
        .await?
        .ok_or(AppError::Unauthenticated)?;

    let valid = crate::crypto::verify_password(&input.password, &user.password_hash)
        .map_err(AppError::internal)?;
    if !valid {
        return Err(AppError::Unauthenticated);
    }

    let issued = state
        .tokens
        .issue(TokenSubject {
            user_id: user.id,
            is_admin: user.is_master_admin,
        })
        .await?;

    Ok(Json(SessionOutput {
        user_id: user.id,
        access_token: issued.access_token,
        refresh_token: issued.refresh_token,
        access_expires_in: issued.access_expires_in,
        refresh_expires_in: issued.refresh_expires_in,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshInput {
    pub refresh_token: String,
}

#[tracing::instrument(skip(state, input))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(input): Json<RefreshInput>,
) -> AppResult<Json<SessionOutput>> {
    let issued = state.tokens.rotate(&input.refresh_token).await?;

    // The rotated claims aren't re-decoded here; the subject is embedded in
    // the freshly issued access token, so callers read it from there.
    let access_claims = state.tokens.validate_access(&issued.access_token).await?;

    Ok(Json(SessionOutput {
        user_id: access_claims.sub,
        access_token: issued.access_token,
        refresh_token: issued.refresh_token,
        access_expires_in: issued.access_expires_in,
        refresh_expires_in: issued.refresh_expires_in,
    }))
}

#[tracing::instrument(skip(state, auth_user))]
pub async fn logout(State(state): State<AppState>, auth_user: AuthUser) -> AppResult<Json<serde_json::Value>> {
    state.tokens.revoke_all(auth_user.user_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct MintTicketInput {
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MintTicketOutput {
    pub ticket: String,
}

#[tracing::instrument(skip(state, auth_user, input))]
pub async fn mint_ws_ticket(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(input): Json<MintTicketInput>,
) -> AppResult<Json<MintTicketOutput>> {
    let decision = state
        .rate_limiter
        .allow(
            "ws_ticket",
            &auth_user.user_id.to_string(),
            default_quota("ws_ticket"),
        )
        .await;
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    if let Some(conversation_id) = input.conversation_id {
        if !db::is_participant(&state.db, conversation_id, auth_user.user_id).await? {
            return Err(AppError::Forbidden);
        }
    }

    let ticket = state
        .tickets
        .mint(TicketClaims {
            user_id: auth_user.user_id,
            conversation_id: input.conversation_id,
        })
        .await?;

    Ok(Json(MintTicketOutput { ticket }))
}
