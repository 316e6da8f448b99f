use std::time::SystemTime;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: u64,
    version: String,
    checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    database: CheckStatus,
    redis: CheckStatus,
    realtime: RealtimeHealthStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    ready: bool,
    checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    database: bool,
    redis: bool,
}

/// Health status for the realtime hub.
#[derive(Debug, Serialize)]
pub struct RealtimeHealthStatus {
    active_connections: usize,
    status: CheckStatus,
}

/// Liveness probe - checks if the application is running
pub async fn liveness() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Readiness probe - checks database and Redis connectivity.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let db_ready = check_database(&state).await;
    let redis_ready = check_redis(&state).await;

    let ready = db_ready && redis_ready;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            checks: ReadinessChecks {
                database: db_ready,
                redis: redis_ready,
            },
        }),
    )
}

/// Health endpoint - detailed health information, including the chat hub's
/// live connection count in place of the teacher's per-conversation-actor
/// count.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_status = if check_database(&state).await {
        CheckStatus::Healthy
    } else {
        CheckStatus::Unhealthy
    };
    let redis_status = if check_redis(&state).await {
        CheckStatus::Healthy
    } else {
        CheckStatus::Unhealthy
    };
    let realtime = check_realtime_health(&state).await;

    let overall_healthy = matches!(db_status, CheckStatus::Healthy)
        && matches!(redis_status, CheckStatus::Healthy)
        && matches!(realtime.status, CheckStatus::Healthy);
    let status = if overall_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let timestamp = match SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        Err(_) => 0,
    };

    (
        status,
        Json(HealthResponse {
            status: if overall_healthy {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            timestamp,
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                database: db_status,
                redis: redis_status,
                realtime,
            },
        }),
    )
}

async fn check_database(state: &AppState) -> bool {
    sqlx::query("SELECT 1").execute(&state.db).await.is_ok()
}

async fn check_redis(state: &AppState) -> bool {
    let mut conn = state.redis.manager();
    redis::cmd("PING")
        .query_async::<String>(&mut conn)
        .await
        .is_ok()
}

async fn check_realtime_health(state: &AppState) -> RealtimeHealthStatus {
    match state.chat_hub.connection_count().await {
        Ok(active_connections) => RealtimeHealthStatus {
            active_connections,
            status: CheckStatus::Healthy,
        },
        Err(_) => RealtimeHealthStatus {
            active_connections: 0,
            status: CheckStatus::Unhealthy,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness() {
        let (status, body) = liveness().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }
}
