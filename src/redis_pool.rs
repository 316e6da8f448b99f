//! Shared Redis connection manager.
//!
//! A single `ConnectionManager` is cloned into every component that needs
//! Redis (tickets, revocation, rate limiting, presence, pub/sub publish
//! side); `ConnectionManager` multiplexes over one physical connection and
//! reconnects transparently, matching the pattern in
//! `NorvetMSP-peanut-pos`'s `integration-gateway` rate limiter. Pub/sub
//! subscription needs its own dedicated connection (a multiplexed
//! `ConnectionManager` cannot enter subscribe mode), so the originating
//! `redis::Client` is kept around too.

use redis::aio::ConnectionManager;
use redis::Client;

#[derive(Clone)]
pub struct RedisPool {
    pub manager: ConnectionManager,
    pub client: Client,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self { manager, client })
    }

    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }
}
