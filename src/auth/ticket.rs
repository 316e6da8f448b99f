//! WS Ticket Broker (C2): single-use, short-lived tickets that hand a
//! WebSocket upgrade its authenticated identity without putting a long-lived
//! bearer token on the wire.
//!
//! The teacher's `handlers/subscription_ticket.rs` signs a JWT and verifies
//! it statelessly, which makes a ticket replayable for its entire TTL. That
//! cannot satisfy "consume is single-use" (spec §4.2), so storage moves
//! server-side: `mint` writes the ticket's claims into Redis under an opaque
//! token, `consume` does an atomic `GETDEL` so a second consume attempt
//! always misses.

use std::time::Duration;

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::redis_pool::RedisPool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketClaims {
    pub user_id: Uuid,
    pub conversation_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct TicketBroker {
    redis: RedisPool,
    ttl: Duration,
}

fn ticket_key(token: &str) -> String {
    format!("wsticket:{token}")
}

impl TicketBroker {
    pub fn new(redis: RedisPool, ttl: Duration) -> Self {
        Self { redis, ttl }
    }

    /// Mints a new single-use ticket token, valid for `ttl` seconds.
    pub async fn mint(&self, claims: TicketClaims) -> AppResult<String> {
        let token = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(&claims).map_err(|err| AppError::internal(err))?;
        let mut conn = self.redis.manager();
        let _: () = conn
            .set_ex(ticket_key(&token), payload, self.ttl.as_secs().max(1))
            .await?;
        Ok(token)
    }

    /// Consumes a ticket token. Returns `None` if the ticket does not exist
    /// or was already consumed; the Redis `GETDEL` makes read-and-delete
    /// atomic so two concurrent consumers can never both succeed.
    pub async fn consume(&self, token: &str) -> AppResult<Option<TicketClaims>> {
        let mut conn = self.redis.manager();
        let payload: Option<String> = conn.get_del(ticket_key(token)).await?;
        match payload {
            Some(raw) => {
                let claims: TicketClaims =
                    serde_json::from_str(&raw).map_err(|err| AppError::internal(err))?;
                Ok(Some(claims))
            }
            None => Ok(None),
        }
    }
}
