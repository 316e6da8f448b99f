//! Per-IP HTTP-layer rate limiting, applied ahead of routing as a defense in
//! depth around the per-resource checks each handler already performs
//! against [`crate::ratelimit::RateLimiter`].
//!
//! The teacher's version was an in-process token bucket keyed by client IP
//! (`TokenBucket`/`RateLimiter`/`extract_client_ip`), which resets on every
//! restart and doesn't coordinate across instances. Replaced with the same
//! `extract_client_ip` header-sniffing but backed by the shared Redis
//! counter so the limit holds across the whole fleet.

use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};

use crate::error::AppError;
use crate::ratelimit::Quota;
use crate::state::AppState;

const HTTP_GLOBAL_QUOTA: Quota = Quota::per_window(600, 60);

pub async fn ip_rate_limit_middleware(
    axum::extract::State(state): axum::extract::State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    use axum::response::IntoResponse;

    let ip = extract_client_ip(request.headers());
    let decision = state
        .rate_limiter
        .allow("http_global", &ip, HTTP_GLOBAL_QUOTA)
        .await;

    if !decision.allowed {
        return AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        }
        .into_response();
    }

    next.run(request).await
}

fn extract_client_ip(headers: &HeaderMap) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(ip) = xff.split(',').next().map(|s| s.trim().to_string()) {
            if !ip.is_empty() {
                return ip;
            }
        }
    }
    if let Some(ip) = headers
        .get("cf-connecting-ip")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|h| h.to_str().ok())
    {
        return ip.to_string();
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_first_xff_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 5.6.7.8"));
        assert_eq!(extract_client_ip(&headers), "1.2.3.4");
    }

    #[test]
    fn falls_back_to_unknown() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), "unknown");
    }
}
