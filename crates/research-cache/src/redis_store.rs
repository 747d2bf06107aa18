use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use research_core::ResearchError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::{CacheStore, WindowState};

static WINDOW_SEQ: AtomicU64 = AtomicU64::new(0);

fn cache_err(e: redis::RedisError) -> ResearchError {
    ResearchError::Cache(e.to_string())
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Decision for a window whose `counted` hits already include the candidate.
fn window_outcome(counted: usize, limit: usize, oldest_ms: Option<i64>, now_ms: i64) -> WindowState {
    let allowed = counted <= limit;
    WindowState {
        allowed,
        count: if allowed { counted } else { counted.saturating_sub(1) },
        oldest_ms: oldest_ms.or(Some(now_ms)),
    }
}

/// Redis-backed store over a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, ResearchError> {
        let client = redis::Client::open(url).map_err(cache_err)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(cache_err)?;
        let store = Self { conn };
        store.ping().await?;
        Ok(store)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ResearchError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(cache_err)?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ResearchError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, value, ttl_secs(ttl))
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ResearchError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(cache_err)?;
        Ok(())
    }

    async fn push_list(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ResearchError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .lpush(key, value)
            .ignore()
            .expire(key, ttl_secs(ttl) as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>, ResearchError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let items: Vec<String> = conn
            .lrange(key, 0, limit as isize - 1)
            .await
            .map_err(cache_err)?;
        Ok(items)
    }

    async fn incr_float(&self, key: &str, by: f64, ttl: Duration) -> Result<f64, ResearchError> {
        let mut conn = self.conn.clone();
        let (value,): (f64,) = redis::pipe()
            .incr(key, by)
            .expire(key, ttl_secs(ttl) as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        Ok(value)
    }

    async fn hash_incr(
        &self,
        key: &str,
        fields: &[(&str, f64)],
        ttl: Duration,
    ) -> Result<(), ResearchError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (field, by) in fields {
            pipe.hincr(key, *field, *by).ignore();
        }
        let _: () = pipe
            .expire(key, ttl_secs(ttl) as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, ResearchError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await.map_err(cache_err)?;
        Ok(fields)
    }

    async fn window_acquire(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
        limit: usize,
    ) -> Result<WindowState, ResearchError> {
        let mut conn = self.conn.clone();
        let window_ms = window.as_millis() as i64;
        // Members must stay unique when hits share a millisecond
        let member = format!("{}-{}", now_ms, WINDOW_SEQ.fetch_add(1, Ordering::Relaxed));

        // Trim, record and count in one transaction so concurrent callers see each other
        let (count, oldest): (usize, Vec<(String, f64)>) = redis::pipe()
            .atomic()
            .zrembyscore(key, "-inf", now_ms - window_ms)
            .ignore()
            .zadd(key, &member, now_ms)
            .ignore()
            .expire(key, ttl_secs(window) as i64)
            .ignore()
            .zcard(key)
            .zrange_withscores(key, 0, 0)
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;

        let state = window_outcome(count, limit, oldest.first().map(|(_, score)| *score as i64), now_ms);
        if !state.allowed {
            let _: () = conn.zrem(key, &member).await.map_err(cache_err)?;
        }
        Ok(state)
    }

    async fn ping(&self) -> Result<(), ResearchError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        Ok(())
    }
}
