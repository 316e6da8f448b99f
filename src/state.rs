//! Shared Axum application state, assembled once at startup in
//! [`crate::main`] and cloned cheaply (every field is an `Arc` or a pool
//! handle) into every handler and extractor.

use axum::extract::FromRef;
use std::sync::Arc;

use crate::auth::ticket::TicketBroker;
use crate::auth::tokens::TokenService;
use crate::config::Config;
use crate::db::DbPool;
use crate::flags::FeatureFlags;
use crate::presence::PresenceTracker;
use crate::pubsub::PubSubBridge;
use crate::ratelimit::RateLimiter;
use crate::realtime::chat_hub::ChatHubHandle;
use crate::realtime::notification_hub::NotificationHubHandle;
use crate::redis_pool::RedisPool;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DbPool,
    pub redis: RedisPool,
    pub tokens: TokenService,
    pub tickets: TicketBroker,
    pub rate_limiter: RateLimiter,
    pub chat_hub: ChatHubHandle,
    pub notification_hub: NotificationHubHandle,
    pub pubsub: PubSubBridge,
    pub flags: FeatureFlags,
    pub presence: PresenceTracker,
}
