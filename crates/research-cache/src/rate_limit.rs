use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::{CacheStore, MemoryStore, WindowState};

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Unix seconds at which the oldest counted request leaves the window
    pub reset_at: i64,
    pub retry_after_secs: Option<u64>,
}

/// Sliding-window limiter keyed by client identifier and scope.
///
/// Windows live in the shared store. When the store errors, the same window
/// is applied against a process-local [`MemoryStore`] so limits still hold.
pub struct RateLimiter {
    store: Arc<dyn CacheStore>,
    fallback: MemoryStore,
    limit: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CacheStore>, limit: usize, window: Duration) -> Self {
        Self {
            store,
            fallback: MemoryStore::new(),
            limit: limit.max(1),
            window,
        }
    }

    pub fn per_minute(store: Arc<dyn CacheStore>, limit: usize) -> Self {
        Self::new(store, limit, Duration::from_secs(60))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub async fn check(&self, identifier: &str, scope: &str) -> RateLimitDecision {
        self.check_at(identifier, scope, Utc::now().timestamp_millis()).await
    }

    /// Admission decision at a given instant.
    pub async fn check_at(&self, identifier: &str, scope: &str, now_ms: i64) -> RateLimitDecision {
        let key = format!("rate_limit:{}:{}", identifier, scope);
        let window_ms = self.window.as_millis() as i64;

        let state = match self.acquire(&key, now_ms).await {
            Some(state) => state,
            None => {
                return RateLimitDecision {
                    allowed: true,
                    limit: self.limit,
                    remaining: self.limit,
                    reset_at: (now_ms + window_ms) / 1000,
                    retry_after_secs: None,
                };
            }
        };

        let reset_ms = state.oldest_ms.unwrap_or(now_ms) + window_ms;
        let retry_after_secs = (!state.allowed)
            .then(|| ((reset_ms - now_ms).max(0) as u64).div_ceil(1000).max(1));

        if !state.allowed {
            tracing::warn!("Rate limit exceeded for {} ({} requests)", key, state.count);
        }

        RateLimitDecision {
            allowed: state.allowed,
            limit: self.limit,
            remaining: self.limit.saturating_sub(state.count),
            reset_at: reset_ms / 1000,
            retry_after_secs,
        }
    }

    async fn acquire(&self, key: &str, now_ms: i64) -> Option<WindowState> {
        match self
            .store
            .window_acquire(key, now_ms, self.window, self.limit)
            .await
        {
            Ok(state) => return Some(state),
            Err(e) => tracing::warn!("Rate limit store failed for {}, using local window: {}", key, e),
        }
        match self
            .fallback
            .window_acquire(key, now_ms, self.window, self.limit)
            .await
        {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::error!("Local rate limit window failed for {}, allowing: {}", key, e);
                None
            }
        }
    }
}
