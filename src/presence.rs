//! Presence Tracker (C10): TTL-based online/offline state in Redis.
//!
//! `touch` unconditionally refreshes a user's presence key TTL and reports
//! whether this call transitioned the user offline→online, via a single
//! atomic `SET key val EX ttl GET` (Redis >= 6.2): the `GET` flag returns
//! the key's prior value without requiring a separate round trip, and
//! unlike `SET ... NX` the key is refreshed on every call instead of only
//! the first. The caller publishes the transition on `presence:user` via
//! [`crate::pubsub::PubSubBridge`]. No pack example tracks presence this
//! way; the command shape follows the same `redis` crate usage as
//! [`crate::ratelimit`].

use std::time::Duration;

use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::AppResult;
use crate::redis_pool::RedisPool;

const PRESENCE_TTL_SECS: u64 = 30;

fn presence_key(user_id: Uuid) -> String {
    format!("presence:{user_id}")
}

#[derive(Clone)]
pub struct PresenceTracker {
    redis: RedisPool,
    ttl: Duration,
}

impl PresenceTracker {
    pub fn new(redis: RedisPool) -> Self {
        Self {
            redis,
            ttl: Duration::from_secs(PRESENCE_TTL_SECS),
        }
    }

    /// Refreshes presence for `user_id`, always resetting the TTL. Returns
    /// `true` if this call transitioned the user from offline to online
    /// (the key did not exist before this call).
    pub async fn touch(&self, user_id: Uuid) -> AppResult<bool> {
        let mut conn = self.redis.manager();
        let opts = redis::SetOptions::default()
            .with_expiration(redis::SetExpiry::EX(self.ttl.as_secs() as usize))
            .get(true);
        let previous: Option<String> = conn
            .set_options(presence_key(user_id), "1", opts)
            .await?;
        Ok(previous.is_none())
    }

    pub async fn is_online(&self, user_id: Uuid) -> AppResult<bool> {
        let mut conn = self.redis.manager();
        let online: bool = conn.exists(presence_key(user_id)).await?;
        Ok(online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_key_is_namespaced() {
        let id = Uuid::nil();
        assert_eq!(presence_key(id), format!("presence:{id}"));
    }
}
