use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use research_cache::RateLimitDecision;
use research_core::ResearchError;
use std::net::SocketAddr;

use crate::{AppError, AppState};

/// Caller address as seen by the rate limiter.
#[derive(Clone, Debug)]
pub struct ClientIp(pub String);

impl ClientIp {
    /// First `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
    pub fn from_request(request: &Request) -> Self {
        let forwarded = |headers: &HeaderMap, name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let ip = forwarded(request.headers(), "x-forwarded-for")
            .or_else(|| forwarded(request.headers(), "x-real-ip"))
            .or_else(|| {
                request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());

        ClientIp(ip)
    }
}

pub fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_at));
}

fn exempt(path: &str) -> bool {
    path == "/health" || path.starts_with("/swagger-ui") || path.starts_with("/api-docs")
}

/// Global per-IP sliding-window limit.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let client = ClientIp::from_request(&request);
    request.extensions_mut().insert(client.clone());

    if exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let decision = state.api_limiter.check(&client.0, "api").await;
    if !decision.allowed {
        tracing::warn!("Rate limit exceeded for {} on {}", client.0, request.uri().path());
        let mut response = AppError::from(ResearchError::RateLimited {
            service: "api".to_string(),
            retry_after_secs: decision.retry_after_secs,
        })
        .into_response();
        apply_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}
