use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sanctum_realtime::auth::ticket::TicketBroker;
use sanctum_realtime::auth::tokens::TokenService;
use sanctum_realtime::config::Config;
use sanctum_realtime::db;
use sanctum_realtime::flags::FeatureFlags;
use sanctum_realtime::handlers;
use sanctum_realtime::health;
use sanctum_realtime::jobs;
use sanctum_realtime::presence::PresenceTracker;
use sanctum_realtime::metrics;
use sanctum_realtime::middleware;
use sanctum_realtime::pubsub::{self, BridgeEvent, PubSubBridge};
use sanctum_realtime::ratelimit::RateLimiter;
use sanctum_realtime::realtime::chat_hub::ChatHubHandle;
use sanctum_realtime::realtime::connection::OutboundEvent;
use sanctum_realtime::realtime::notification_hub::NotificationHubHandle;
use sanctum_realtime::realtime::websocket::ws_chat_handler;
use sanctum_realtime::redis_pool::RedisPool;
use sanctum_realtime::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env()?);

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if config.environment.is_production() {
            "warn".to_string()
        } else {
            "debug".to_string()
        }
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(environment = ?config.environment, "starting sanctum realtime server");

    let metrics_recorder = metrics::MetricsRecorder::new();
    let metrics_handle = metrics_recorder.handle().clone();
    tracing::info!("metrics initialized");

    let redis = RedisPool::connect(&config.redis_url).await?;
    tracing::info!("redis connected");

    let tokens = TokenService::new(
        &config.jwt_secret,
        redis.manager(),
        config.access_ttl,
        config.refresh_ttl,
    );
    let tickets = TicketBroker::new(redis.clone(), config.ticket_ttl);
    let rate_limiter = RateLimiter::new(redis.clone());
    let presence = PresenceTracker::new(redis.clone());
    let flags = FeatureFlags::from_env();
    tracing::info!("auth, rate limiter, and feature flags initialized");

    let db_pool = db::init_db(db::DbConfig {
        database_url: config.database_url.clone(),
        ..db::DbConfig::default()
    })
    .await?;
    tracing::info!("database initialized and migrated");

    let pubsub_bridge = PubSubBridge::new(redis.clone());

    let chat_hub = ChatHubHandle::spawn(config.max_conns_per_user, config.max_total_conns).await?;
    let notification_hub = NotificationHubHandle::spawn(config.max_conns_per_user).await?;
    tracing::info!("chat and notification hubs spawned");

    // Cross-instance fan-in: every message/typing event published to Redis
    // (including by this instance) is delivered into this process's local
    // hub, so a publisher and a remote subscriber converge on one code path.
    {
        let chat_hub = chat_hub.clone();
        pubsub_bridge.spawn_pattern_subscriber("chat:conv:*".to_string(), move |event| {
            if let BridgeEvent::Message {
                conversation_id,
                message_id,
                sender_id,
                content,
            } = event
            {
                chat_hub.publish_local(
                    conversation_id,
                    OutboundEvent::Message {
                        conversation_id,
                        message_id,
                        sender_id,
                        content,
                        ts: chrono::Utc::now(),
                    },
                );
            }
        });
    }
    {
        let chat_hub = chat_hub.clone();
        pubsub_bridge.spawn_pattern_subscriber("typing:conv:*".to_string(), move |event| {
            if let BridgeEvent::Typing {
                conversation_id,
                user_id,
            } = event
            {
                chat_hub.publish_local(
                    conversation_id,
                    OutboundEvent::Typing {
                        conversation_id,
                        user_id,
                    },
                );
            }
        });
    }
    {
        let chat_hub = chat_hub.clone();
        pubsub_bridge.spawn_subscriber(pubsub::PRESENCE_CHANNEL.to_string(), move |event| {
            if let BridgeEvent::Presence { user_id, online } = event {
                chat_hub.broadcast_all(OutboundEvent::Presence { user_id, online });
            }
        });
    }
    {
        let notification_hub = notification_hub.clone();
        pubsub_bridge.spawn_pattern_subscriber("notifications:user:*".to_string(), move |event| {
            if let BridgeEvent::Notification { user_id, payload } = event {
                notification_hub.deliver(user_id, OutboundEvent::Notification { payload });
            }
        });
    }
    tracing::info!("pub/sub fan-in subscribers started");

    {
        let pool = db_pool.clone();
        let pubsub = pubsub_bridge.clone();
        let interval = config.outbox_sweep_interval;
        let retention_days = config.outbox_retention_days;
        tokio::spawn(jobs::run_outbox_sweeper(pool, pubsub, interval, retention_days));
    }

    let app_state = AppState {
        config: config.clone(),
        db: db_pool,
        redis,
        tokens,
        tickets,
        rate_limiter,
        chat_hub,
        notification_hub,
        pubsub: pubsub_bridge,
        flags,
        presence,
    };

    let metrics_router = if config.enable_metrics {
        Router::new()
            .route("/metrics", get(metrics::metrics_handler))
            .with_state(metrics_handle)
    } else {
        Router::new()
    };

    let cors = if config.allowed_origins.is_empty() {
        CorsLayer::new()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers(tower_http::cors::Any)
    };

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/api/auth/signup", post(handlers::signup))
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/refresh", post(handlers::refresh))
        .route("/api/auth/logout", post(handlers::logout))
        .route("/api/ws/ticket", post(handlers::mint_ws_ticket))
        .route(
            "/api/chat/conversations",
            get(handlers::list_conversations).post(handlers::create_conversation),
        )
        .route(
            "/api/chat/conversations/:id/messages",
            get(handlers::list_messages).post(handlers::send_message),
        )
        .route("/api/chat/conversations/:id/read", post(handlers::mark_read))
        .route(
            "/api/chatrooms/:id/moderators",
            get(handlers::list_moderators).post(handlers::grant_moderator),
        )
        .route(
            "/api/chatrooms/:id/moderators/:user_id",
            axum::routing::delete(handlers::revoke_moderator),
        )
        .route(
            "/api/chatrooms/:id/participants/:user_id",
            axum::routing::delete(handlers::remove_participant),
        )
        .route("/api/ws/chat", get(ws_chat_handler))
        .merge(metrics_router)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            middleware::ip_rate_limit_middleware,
        ))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl_c handler");
    tracing::info!("shutdown signal received");
}
