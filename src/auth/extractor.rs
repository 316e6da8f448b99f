//! Axum extractor pulling an [`AuthUser`] out of a Bearer access token.
//!
//! The teacher's `impl FromRequestParts<S> for AuthUser` constructed a new
//! `AuthMiddleware::new()` on every single request — an expensive per-call
//! rebuild of its DID cache and rate limiters. Here the extractor reads the
//! already-constructed `TokenService` out of `AppState` instead, so state is
//! built once at startup and shared.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use uuid::Uuid;

use crate::auth::tokens::TokenService;
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub is_admin: bool,
    pub jti: Uuid,
    pub exp: i64,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let tokens: TokenService = state.tokens.clone();
        let claims = tokens
            .validate_access(token)
            .await
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser {
            user_id: claims.sub,
            is_admin: claims.is_admin,
            jti: claims.jti,
            exp: claims.exp,
        })
    }
}
