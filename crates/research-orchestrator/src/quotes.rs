use chrono::Utc;
use cost_tracker::CostTracker;
use futures_util::stream::{self, StreamExt};
use market_calendar::MarketSession;
use research_cache::{CacheStore, QuoteCache, QuoteCacheStats};
use research_core::{Bar, Quote, QuoteProvider, ResearchError, SymbolValidator};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

const DEFAULT_BATCH_CONCURRENCY: usize = 5;

/// Outcome for one symbol of a batch request.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BatchQuote {
    pub symbol: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Quote>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Quote lookups through the cache, the provider and the stale fallback.
pub struct QuoteService {
    provider: Arc<dyn QuoteProvider>,
    cache: QuoteCache,
    validator: Arc<SymbolValidator>,
    costs: Option<Arc<CostTracker>>,
    batch_concurrency: usize,
}

impl QuoteService {
    pub fn new(provider: Arc<dyn QuoteProvider>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            provider,
            cache: QuoteCache::new(store),
            validator: Arc::new(SymbolValidator::new()),
            costs: None,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    pub fn with_validator(mut self, validator: Arc<SymbolValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_cost_tracker(mut self, costs: Arc<CostTracker>) -> Self {
        self.costs = Some(costs);
        self
    }

    pub fn with_batch_concurrency(mut self, n: usize) -> Self {
        self.batch_concurrency = n.max(1);
        self
    }

    pub fn validator(&self) -> &Arc<SymbolValidator> {
        &self.validator
    }

    pub fn provider(&self) -> &Arc<dyn QuoteProvider> {
        &self.provider
    }

    pub fn cache_stats(&self) -> QuoteCacheStats {
        self.cache.stats(Utc::now())
    }

    pub async fn get_quote(&self, raw_symbol: &str, refresh: bool) -> Result<Quote, ResearchError> {
        let symbol = self.validator.validate(raw_symbol)?;
        let now = Utc::now();

        if !refresh {
            if let Some(hit) = self.cache.get_fresh(&symbol, now).await {
                return Ok(hit);
            }
        }

        match self.provider.get_quote(&symbol).await {
            Ok(mut quote) => {
                quote.market_status = MarketSession::for_symbol(&symbol).phase(&now);
                self.cache.put(&quote).await;
                self.validator.record_fetch_success(&symbol);
                if let Some(costs) = &self.costs {
                    costs.record_data_api(self.provider.name(), 1).await;
                }
                tracing::debug!("Fetched {} from {} at {:.2}", symbol, self.provider.name(), quote.price);
                Ok(quote)
            }
            Err(e) => {
                // Only a definitive miss counts against the symbol; outages must not demote it
                if matches!(e, ResearchError::NotFound(_)) {
                    self.validator.record_fetch_error(&symbol, &e.to_string());
                    return Err(e);
                }
                match self.cache.get_stale(&symbol, now).await {
                    Some(stale) => {
                        tracing::warn!(
                            "Serving stale quote for {} ({}s old) after provider error: {}",
                            symbol,
                            stale.cache_age_seconds.unwrap_or_default(),
                            e
                        );
                        Ok(stale)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Quotes for several symbols. Duplicates are collapsed and order is kept.
    pub async fn get_quotes(&self, symbols: &[String], refresh: bool) -> Vec<BatchQuote> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = symbols
            .iter()
            .map(|s| SymbolValidator::normalize(s))
            .filter(|s| seen.insert(s.clone()))
            .collect();

        let mut results: Vec<(usize, BatchQuote)> = stream::iter(unique.into_iter().enumerate())
            .map(|(i, symbol)| async move {
                let outcome = match self.get_quote(&symbol, refresh).await {
                    Ok(quote) => BatchQuote {
                        symbol,
                        success: true,
                        data: Some(quote),
                        error: None,
                    },
                    Err(e) => BatchQuote {
                        symbol,
                        success: false,
                        data: None,
                        error: Some(e.to_string()),
                    },
                };
                (i, outcome)
            })
            .buffer_unordered(self.batch_concurrency)
            .collect()
            .await;

        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, r)| r).collect()
    }

    pub async fn get_history(
        &self,
        raw_symbol: &str,
        range: &str,
        interval: &str,
    ) -> Result<Vec<Bar>, ResearchError> {
        let symbol = self.validator.validate(raw_symbol)?;
        self.provider.get_history(&symbol, range, interval).await
    }

    pub async fn invalidate(&self, symbol: &str) {
        self.cache.invalidate(&SymbolValidator::normalize(symbol)).await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use research_cache::MemoryStore;
    use research_core::{DataSource, MarketStatus};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Provider returning fixed prices, switchable into a failing state.
    pub(crate) struct StubProvider {
        pub calls: AtomicU32,
        pub failing: AtomicBool,
        pub change_percent: f64,
    }

    impl StubProvider {
        pub(crate) fn new(change_percent: f64) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failing: AtomicBool::new(false),
                change_percent,
            }
        }
    }

    pub(crate) fn quote(symbol: &str, change_percent: f64) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            price: 150.0,
            change: 150.0 * change_percent / 100.0,
            change_percent,
            volume: 1_000_000,
            open: 148.0,
            high: 151.0,
            low: 147.5,
            previous_close: 148.0,
            market_cap: Some(2.4e12),
            market_cap_display: Some("2.40T".to_string()),
            pe_ratio: Some(28.5),
            dividend_yield: None,
            fifty_two_week_high: Some(199.6),
            fifty_two_week_low: Some(124.2),
            currency: Some("USD".to_string()),
            exchange: Some("NMS".to_string()),
            timestamp: Utc::now(),
            source: DataSource::YahooFinance,
            market_status: MarketStatus::Open,
            is_cached: false,
            cache_age_seconds: None,
        }
    }

    #[async_trait]
    impl QuoteProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn get_quote(&self, symbol: &str) -> Result<Quote, ResearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if symbol == "ZZZZ" {
                return Err(ResearchError::NotFound(symbol.to_string()));
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(ResearchError::upstream("stub", Some(503), "down"));
            }
            Ok(quote(symbol, self.change_percent))
        }

        async fn get_history(
            &self,
            _symbol: &str,
            _range: &str,
            _interval: &str,
        ) -> Result<Vec<Bar>, ResearchError> {
            Ok(Vec::new())
        }

        async fn health_check(&self) -> bool {
            !self.failing.load(Ordering::SeqCst)
        }
    }

    fn service(provider: Arc<StubProvider>) -> QuoteService {
        QuoteService::new(provider, Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_second_read_is_served_from_cache() {
        let provider = Arc::new(StubProvider::new(1.0));
        let service = service(provider.clone());

        let first = service.get_quote("aapl", false).await.unwrap();
        assert_eq!(first.symbol, "AAPL");
        assert!(!first.is_cached);

        // Cache freshness depends on the wall clock, so only assert when it hit
        let second = service.get_quote("AAPL", false).await.unwrap();
        if second.is_cached {
            assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
            assert_eq!(second.source, DataSource::Cached);
        }

        service.get_quote("AAPL", true).await.unwrap();
        assert!(provider.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_invalid_symbol_never_reaches_provider() {
        let provider = Arc::new(StubProvider::new(1.0));
        let service = service(provider.clone());

        let err = service.get_quote("NOT A SYMBOL!", false).await.unwrap_err();
        assert!(matches!(err, ResearchError::InvalidSymbol(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_fallback_when_provider_fails() {
        let provider = Arc::new(StubProvider::new(1.0));
        let service = service(provider.clone());
        service.get_quote("MSFT", false).await.unwrap();

        provider.failing.store(true, Ordering::SeqCst);
        let stale = service.get_quote("MSFT", true).await.unwrap();
        assert_eq!(stale.source, DataSource::StaleCache);
        assert!(stale.is_cached);

        let err = service.get_quote("NVDA", true).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_provider_outage_never_demotes_symbol() {
        let provider = Arc::new(StubProvider::new(1.0));
        let service = service(provider.clone());
        service.get_quote("MSFT", false).await.unwrap();

        provider.failing.store(true, Ordering::SeqCst);
        for _ in 0..8 {
            let stale = service.get_quote("MSFT", true).await.unwrap();
            assert_eq!(stale.source, DataSource::StaleCache);
        }
        assert_eq!(
            service.validator().info("MSFT").status,
            research_core::SymbolStatus::Valid
        );

        provider.failing.store(false, Ordering::SeqCst);
        let calls = provider.calls.load(Ordering::SeqCst);
        let live = service.get_quote("MSFT", true).await.unwrap();
        assert!(!live.is_cached);
        assert_eq!(provider.calls.load(Ordering::SeqCst), calls + 1);
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_demoted_after_repeated_misses() {
        let provider = Arc::new(StubProvider::new(1.0));
        let service = service(provider.clone());

        for _ in 0..5 {
            let err = service.get_quote("ZZZZ", true).await.unwrap_err();
            assert!(matches!(err, ResearchError::NotFound(_)));
        }
        let calls = provider.calls.load(Ordering::SeqCst);
        let err = service.get_quote("ZZZZ", true).await.unwrap_err();
        assert!(matches!(err, ResearchError::InvalidSymbol(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_batch_dedupes_and_reports_per_symbol() {
        let provider = Arc::new(StubProvider::new(1.0));
        let service = service(provider.clone()).with_batch_concurrency(2);

        let symbols = ["aapl", "AAPL", "ZZZZ", "msft", "$$$"].map(String::from);
        let results = service.get_quotes(&symbols, true).await;

        let names: Vec<_> = results.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(names, vec!["AAPL", "ZZZZ", "MSFT", "$$$"]);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[2].success);
        assert!(!results[3].success);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }
}
