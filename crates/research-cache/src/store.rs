use async_trait::async_trait;
use research_core::ResearchError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::{MemoryStore, RedisStore};

/// Result of one sliding-window admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub allowed: bool,
    /// Hits inside the window, including this one when allowed
    pub count: usize,
    /// Timestamp of the oldest hit still inside the window
    pub oldest_ms: Option<i64>,
}

/// Key/value operations the cache layer needs, modelled on Redis commands.
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, ResearchError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ResearchError>;

    async fn delete(&self, key: &str) -> Result<(), ResearchError>;

    /// Prepend to a list and refresh its expiry.
    async fn push_list(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ResearchError>;

    /// Up to `limit` list items, newest first.
    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>, ResearchError>;

    /// Add to a float counter and refresh its expiry, returning the new value.
    async fn incr_float(&self, key: &str, by: f64, ttl: Duration) -> Result<f64, ResearchError>;

    /// Add to several float fields of a hash in one step and refresh its expiry.
    async fn hash_incr(
        &self,
        key: &str,
        fields: &[(&str, f64)],
        ttl: Duration,
    ) -> Result<(), ResearchError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, ResearchError>;

    /// Drop hits older than `window`, then record a hit at `now_ms` if fewer than `limit` remain.
    async fn window_acquire(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
        limit: usize,
    ) -> Result<WindowState, ResearchError>;

    async fn ping(&self) -> Result<(), ResearchError>;
}

/// Connect to Redis when a URL is configured, falling back to memory.
pub async fn connect(redis_url: Option<&str>) -> Arc<dyn CacheStore> {
    let Some(url) = redis_url.map(str::trim).filter(|u| !u.is_empty()) else {
        tracing::info!("REDIS_URL not set, using in-memory cache store");
        return Arc::new(MemoryStore::new());
    };

    match tokio::time::timeout(Duration::from_secs(3), RedisStore::connect(url)).await {
        Ok(Ok(store)) => {
            tracing::info!("Connected to Redis cache");
            Arc::new(store)
        }
        Ok(Err(e)) => {
            tracing::warn!("Redis unavailable ({}), using in-memory cache store", e);
            Arc::new(MemoryStore::new())
        }
        Err(_) => {
            tracing::warn!("Redis connection timed out, using in-memory cache store");
            Arc::new(MemoryStore::new())
        }
    }
}
