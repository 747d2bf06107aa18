use chrono::{DateTime, Utc};
use dashmap::DashMap;
use market_calendar::{cache_ttl, MarketSession};
use research_core::{DataSource, Quote};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::CacheStore;

const STALE_TTL: Duration = Duration::from_secs(24 * 3600);
const DEFAULT_LOCAL_CAPACITY: usize = 1000;

pub fn quote_key(symbol: &str) -> String {
    format!("stock:quote:{}", symbol.to_uppercase())
}

fn stale_key(symbol: &str) -> String {
    format!("{}:stale", quote_key(symbol))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuoteCacheStats {
    pub backend: String,
    pub local_entries: usize,
    pub local_fresh: usize,
    pub local_stale: usize,
}

/// Market-aware quote cache.
///
/// Entries live for the TTL of the market phase they were fetched in, and a
/// read is only served while the quote is younger than the TTL of the
/// *current* phase, so a quote cached overnight is not reused after the open.
/// A long-lived stale copy backs the last-resort fallback.
pub struct QuoteCache {
    store: Arc<dyn CacheStore>,
    local: DashMap<String, Quote>,
    max_local: usize,
}

impl QuoteCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_local_capacity(store, DEFAULT_LOCAL_CAPACITY)
    }

    pub fn with_local_capacity(store: Arc<dyn CacheStore>, max_local: usize) -> Self {
        Self {
            store,
            local: DashMap::new(),
            max_local: max_local.max(1),
        }
    }

    fn is_fresh(quote: &Quote, now: DateTime<Utc>) -> bool {
        let phase = MarketSession::for_symbol(&quote.symbol).phase(&now);
        let max_age = cache_ttl(phase).min(cache_ttl(quote.market_status));
        quote.age_seconds(now) as u64 <= max_age.as_secs()
    }

    fn mark(mut quote: Quote, source: DataSource, now: DateTime<Utc>) -> Quote {
        quote.cache_age_seconds = Some(quote.age_seconds(now));
        quote.is_cached = true;
        quote.source = source;
        quote
    }

    fn remember_locally(&self, quote: &Quote) {
        let key = quote.symbol.to_uppercase();
        if !self.local.contains_key(&key) && self.local.len() >= self.max_local {
            let oldest = self
                .local
                .iter()
                .min_by_key(|e| e.timestamp)
                .map(|e| e.key().clone());
            if let Some(oldest) = oldest {
                self.local.remove(&oldest);
            }
        }
        self.local.insert(key, quote.clone());
    }

    fn decode(raw: &str, key: &str) -> Option<Quote> {
        match serde_json::from_str(raw) {
            Ok(q) => Some(q),
            Err(e) => {
                tracing::warn!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        }
    }

    async fn read(&self, key: &str) -> Option<Quote> {
        match self.store.get(key).await {
            Ok(raw) => raw.and_then(|r| Self::decode(&r, key)),
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Store a freshly fetched quote.
    pub async fn put(&self, quote: &Quote) {
        self.remember_locally(quote);

        let payload = match serde_json::to_string(quote) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Failed to serialize quote for {}: {}", quote.symbol, e);
                return;
            }
        };

        let ttl = cache_ttl(quote.market_status);
        if let Err(e) = self.store.set_ex(&quote_key(&quote.symbol), &payload, ttl).await {
            tracing::warn!("Cache write failed for {}: {}", quote.symbol, e);
            return;
        }
        if let Err(e) = self.store.set_ex(&stale_key(&quote.symbol), &payload, STALE_TTL).await {
            tracing::warn!("Stale cache write failed for {}: {}", quote.symbol, e);
        }
    }

    /// Cached quote still fresh enough for the market's current phase.
    pub async fn get_fresh(&self, symbol: &str, now: DateTime<Utc>) -> Option<Quote> {
        let key = quote_key(symbol);
        let candidate = match self.read(&key).await {
            Some(q) => Some(q),
            None => self.local.get(&symbol.to_uppercase()).map(|q| q.clone()),
        }?;

        if Self::is_fresh(&candidate, now) {
            tracing::debug!("Cache hit for {}", symbol);
            Some(Self::mark(candidate, DataSource::Cached, now))
        } else {
            None
        }
    }

    /// Most recent quote regardless of age, for use when the provider is down.
    pub async fn get_stale(&self, symbol: &str, now: DateTime<Utc>) -> Option<Quote> {
        let candidate = match self.read(&stale_key(symbol)).await {
            Some(q) => Some(q),
            None => self.local.get(&symbol.to_uppercase()).map(|q| q.clone()),
        }?;
        Some(Self::mark(candidate, DataSource::StaleCache, now))
    }

    pub async fn invalidate(&self, symbol: &str) {
        self.local.remove(&symbol.to_uppercase());
        for key in [quote_key(symbol), stale_key(symbol)] {
            if let Err(e) = self.store.delete(&key).await {
                tracing::warn!("Cache delete failed for {}: {}", key, e);
            }
        }
    }

    pub fn stats(&self, now: DateTime<Utc>) -> QuoteCacheStats {
        let local_entries = self.local.len();
        let local_fresh = self
            .local
            .iter()
            .filter(|e| Self::is_fresh(e.value(), now))
            .count();
        QuoteCacheStats {
            backend: self.store.backend().to_string(),
            local_entries,
            local_fresh,
            local_stale: local_entries - local_fresh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use chrono::TimeZone;
    use research_core::MarketStatus;

    fn sample_quote(symbol: &str, at: DateTime<Utc>, status: MarketStatus) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            price: 100.0,
            change: 1.0,
            change_percent: 1.0,
            volume: 1_000,
            open: 99.0,
            high: 101.0,
            low: 98.5,
            previous_close: 99.0,
            market_cap: None,
            market_cap_display: None,
            pe_ratio: None,
            dividend_yield: None,
            fifty_two_week_high: None,
            fifty_two_week_low: None,
            currency: Some("USD".to_string()),
            exchange: None,
            timestamp: at,
            source: DataSource::YahooFinance,
            market_status: status,
            is_cached: false,
            cache_age_seconds: None,
        }
    }

    fn cache() -> QuoteCache {
        QuoteCache::new(Arc::new(MemoryStore::new()))
    }

    // Tuesday 2024-02-06 15:00 UTC, 10:00 in New York
    fn market_hours() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 6, 15, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_hit_is_marked_cached() {
        let cache = cache();
        let fetched = market_hours();
        cache.put(&sample_quote("AAPL", fetched, MarketStatus::Open)).await;

        let hit = cache
            .get_fresh("aapl", fetched + chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert!(hit.is_cached);
        assert_eq!(hit.source, DataSource::Cached);
        assert_eq!(hit.cache_age_seconds, Some(30));
    }

    #[tokio::test]
    async fn test_open_market_quote_expires_after_a_minute() {
        let cache = cache();
        let fetched = market_hours();
        cache.put(&sample_quote("AAPL", fetched, MarketStatus::Open)).await;

        let later = fetched + chrono::Duration::seconds(90);
        assert!(cache.get_fresh("AAPL", later).await.is_none());

        let stale = cache.get_stale("AAPL", later).await.unwrap();
        assert_eq!(stale.source, DataSource::StaleCache);
        assert_eq!(stale.cache_age_seconds, Some(90));
    }

    #[tokio::test]
    async fn test_overnight_quote_not_reused_after_open() {
        let cache = cache();
        // Fetched 09:00 New York and stored with the closed-market TTL
        let fetched = Utc.with_ymd_and_hms(2024, 2, 6, 14, 0, 0).unwrap();
        cache.put(&sample_quote("MSFT", fetched, MarketStatus::Closed)).await;

        // 09:32 New York: regular session only accepts 60s old data
        let after_open = Utc.with_ymd_and_hms(2024, 2, 6, 14, 32, 0).unwrap();
        assert!(cache.get_fresh("MSFT", after_open).await.is_none());
    }

    #[tokio::test]
    async fn test_local_mirror_is_bounded() {
        let cache = QuoteCache::with_local_capacity(Arc::new(MemoryStore::new()), 2);
        let t0 = market_hours();
        cache.put(&sample_quote("A", t0, MarketStatus::Open)).await;
        cache.put(&sample_quote("B", t0 + chrono::Duration::seconds(1), MarketStatus::Open)).await;
        cache.put(&sample_quote("C", t0 + chrono::Duration::seconds(2), MarketStatus::Open)).await;

        let stats = cache.stats(t0 + chrono::Duration::seconds(3));
        assert_eq!(stats.local_entries, 2);
        assert_eq!(stats.backend, "memory");
    }

    #[tokio::test]
    async fn test_invalidate_removes_everything() {
        let cache = cache();
        let t0 = market_hours();
        cache.put(&sample_quote("NVDA", t0, MarketStatus::Open)).await;
        cache.invalidate("NVDA").await;
        assert!(cache.get_fresh("NVDA", t0).await.is_none());
        assert!(cache.get_stale("NVDA", t0).await.is_none());
    }
}
