//! Token Service (C1): HMAC-SHA256 access/refresh issuance, validation,
//! single-use refresh rotation with family-wide revocation on reuse, and
//! user-wide revocation (`revoke_all`) for logout.
//!
//! Grounded on the HS256 verification branch of the teacher's `auth.rs` and
//! on `NorvetMSP-peanut-pos`'s `auth-service/src/tokens.rs` issue/rotate
//! shape, generalized from RSA-signed-tokens-plus-a-Postgres-refresh-table
//! to HMAC-signed tokens backed by Redis for revocation and family tracking
//! (no pack example does reuse-triggered family revocation; this part is an
//! original synthesis on top of that shape). `revoke_all` tracks every
//! refresh family a user has live under `user_families:{user_id}` and a
//! `revoked_before:{user_id}` watermark compared against each access token's
//! `iat`, since a single access token carries no family id to revoke by.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Clone, Debug)]
pub struct TokenSubject {
    pub user_id: Uuid,
    pub is_admin: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub jti: Uuid,
    pub is_admin: bool,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct RefreshClaims {
    sub: Uuid,
    jti: Uuid,
    family: Uuid,
    is_admin: bool,
    exp: i64,
    iat: i64,
}

#[derive(Debug)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_in: i64,
    pub refresh_expires_in: i64,
}

#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    redis: ConnectionManager,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

fn revoked_key(jti: Uuid) -> String {
    format!("revoked:jti:{jti}")
}

fn family_key(family: Uuid) -> String {
    format!("family:{family}")
}

fn user_families_key(user_id: Uuid) -> String {
    format!("user_families:{user_id}")
}

fn revoked_before_key(user_id: Uuid) -> String {
    format!("revoked_before:{user_id}")
}

impl TokenService {
    pub fn new(
        secret: &str,
        redis: ConnectionManager,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            redis,
            access_ttl,
            refresh_ttl,
        }
    }

    /// Issues a fresh access/refresh pair under a new refresh family. Used
    /// at login.
    pub async fn issue(&self, subject: TokenSubject) -> AppResult<IssuedTokens> {
        self.issue_for_family(subject, Uuid::new_v4()).await
    }

    async fn issue_for_family(
        &self,
        subject: TokenSubject,
        family: Uuid,
    ) -> AppResult<IssuedTokens> {
        let now = Utc::now();
        let access_jti = Uuid::new_v4();
        let access_exp = now + chrono::Duration::from_std(self.access_ttl).unwrap();
        let access_claims = AccessClaims {
            sub: subject.user_id,
            jti: access_jti,
            is_admin: subject.is_admin,
            exp: access_exp.timestamp(),
            iat: now.timestamp_millis(),
        };
        let access_token = encode(&Header::new(Algorithm::HS256), &access_claims, &self.encoding_key)
            .map_err(|err| AppError::internal(err))?;

        let refresh_jti = Uuid::new_v4();
        let refresh_exp = now + chrono::Duration::from_std(self.refresh_ttl).unwrap();
        let refresh_claims = RefreshClaims {
            sub: subject.user_id,
            jti: refresh_jti,
            family,
            is_admin: subject.is_admin,
            exp: refresh_exp.timestamp(),
            iat: now.timestamp(),
        };
        let refresh_token =
            encode(&Header::new(Algorithm::HS256), &refresh_claims, &self.encoding_key)
                .map_err(|err| AppError::internal(err))?;

        // Track every live refresh jti under its family so a reuse can
        // revoke the whole lineage, and every family under its user so
        // logout can revoke every lineage the user currently holds.
        let mut conn = self.redis.clone();
        let _: () = conn
            .sadd(family_key(family), refresh_jti.to_string())
            .await
            .unwrap_or(());
        let _: () = conn
            .expire(family_key(family), self.refresh_ttl.as_secs() as i64)
            .await
            .unwrap_or(());
        let _: () = conn
            .sadd(user_families_key(subject.user_id), family.to_string())
            .await
            .unwrap_or(());
        let _: () = conn
            .expire(user_families_key(subject.user_id), self.refresh_ttl.as_secs() as i64)
            .await
            .unwrap_or(());

        Ok(IssuedTokens {
            access_token,
            refresh_token,
            access_expires_in: self.access_ttl.as_secs() as i64,
            refresh_expires_in: self.refresh_ttl.as_secs() as i64,
        })
    }

    /// Validates an access token: signature, expiry, and revocation.
    pub async fn validate_access(&self, token: &str) -> AppResult<AccessClaims> {
        let data = decode::<AccessClaims>(
            token,
            &self.decoding_key,
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| AppError::Unauthenticated)?;

        let mut conn = self.redis.clone();
        let revoked: bool = conn
            .exists(revoked_key(data.claims.jti))
            .await
            .unwrap_or(false);
        if revoked {
            return Err(AppError::Unauthenticated);
        }

        // `revoke_all` blacklists every token issued before the logout
        // instant rather than every jti individually; a token minted before
        // that instant fails here even though its own jti was never touched.
        // Millisecond resolution keeps a token reissued in the same logout
        // request from racing its own watermark.
        let revoked_before: Option<i64> = conn
            .get(revoked_before_key(data.claims.sub))
            .await
            .unwrap_or(None);
        if let Some(threshold) = revoked_before {
            if data.claims.iat < threshold {
                return Err(AppError::Unauthenticated);
            }
        }

        Ok(data.claims)
    }

    /// Consumes a refresh token exactly once, issuing a new pair under the
    /// same family. If the presented jti was already consumed (replay), the
    /// entire family is revoked and the call fails, per the reuse-detection
    /// invariant.
    pub async fn rotate(&self, refresh_token: &str) -> AppResult<IssuedTokens> {
        let data = decode::<RefreshClaims>(
            refresh_token,
            &self.decoding_key,
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| AppError::Unauthenticated)?;
        let claims = data.claims;

        let mut conn = self.redis.clone();
        let already_used: bool = conn.exists(revoked_key(claims.jti)).await.unwrap_or(false);
        if already_used {
            self.revoke_family(claims.family).await?;
            return Err(AppError::Unauthenticated);
        }

        // Single-use: mark this jti revoked immediately, TTL matched to what
        // remained of its own lifetime.
        let remaining = (claims.exp - Utc::now().timestamp()).max(1) as i64;
        let _: () = conn
            .set_ex(revoked_key(claims.jti), 1, remaining as u64)
            .await
            .unwrap_or(());

        self.issue_for_family(
            TokenSubject {
                user_id: claims.sub,
                is_admin: claims.is_admin,
            },
            claims.family,
        )
        .await
    }

    /// Revokes every refresh jti ever issued under `family`, and prevents
    /// further rotation from that lineage.
    pub async fn revoke_family(&self, family: Uuid) -> AppResult<()> {
        let mut conn = self.redis.clone();
        let members: Vec<String> = conn.smembers(family_key(family)).await.unwrap_or_default();
        for member in members {
            let _: () = conn
                .set_ex(format!("revoked:jti:{member}"), 1, self.refresh_ttl.as_secs())
                .await
                .unwrap_or(());
        }
        Ok(())
    }

    /// Revokes a single access token ahead of its natural expiry. Kept for
    /// callers that only want to kill one session's access token; logout
    /// uses [`Self::revoke_all`] instead, since a single jti blacklist entry
    /// has no way to reach that user's other live sessions or refresh side.
    #[allow(dead_code)]
    pub async fn revoke_access(&self, jti: Uuid, ttl: Duration) -> AppResult<()> {
        let mut conn = self.redis.clone();
        let _: () = conn
            .set_ex(revoked_key(jti), 1, ttl.as_secs().max(1))
            .await
            .unwrap_or(());
        Ok(())
    }

    /// Logout semantics: blacklists every access token issued to `user_id`
    /// up to this instant and revokes every refresh family it currently
    /// holds, so neither side of an existing session keeps working.
    pub async fn revoke_all(&self, user_id: Uuid) -> AppResult<()> {
        let mut conn = self.redis.clone();
        let now = Utc::now().timestamp_millis();
        let _: () = conn
            .set_ex(revoked_before_key(user_id), now, self.access_ttl.as_secs().max(1))
            .await
            .unwrap_or(());

        let families: Vec<String> = conn
            .smembers(user_families_key(user_id))
            .await
            .unwrap_or_default();
        for family in families {
            if let Ok(family_id) = Uuid::parse_str(&family) {
                self.revoke_family(family_id).await?;
            }
        }
        Ok(())
    }
}
