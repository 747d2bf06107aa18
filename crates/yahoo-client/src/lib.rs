pub mod chart;
pub mod rate_limiter;

use async_trait::async_trait;
use chrono::Utc;
use market_calendar::MarketSession;
use reqwest::{Client, StatusCode};
use research_core::{
    retry_async, Bar, CircuitBreaker, CircuitState, Quote, QuoteProvider, ResearchError,
    RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;

pub use chart::{format_market_cap, round2};
pub use rate_limiter::RateLimiter;

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const SERVICE: &str = "Yahoo Finance";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct YahooConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub rate_limit_per_minute: usize,
    pub retry: RetryPolicy,
    pub breaker_threshold: u32,
    pub breaker_recovery: Duration,
}

impl Default for YahooConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
            rate_limit_per_minute: 120,
            retry: RetryPolicy::yahoo(),
            breaker_threshold: 5,
            breaker_recovery: Duration::from_secs(300),
        }
    }
}

impl YahooConfig {
    /// Defaults overridden by YAHOO_FINANCE_TIMEOUT, YAHOO_RATE_LIMIT and YAHOO_FINANCE_BASE_URL.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = std::env::var("YAHOO_FINANCE_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(limit) = std::env::var("YAHOO_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            config.rate_limit_per_minute = limit;
        }
        if let Ok(url) = std::env::var("YAHOO_FINANCE_BASE_URL") {
            if !url.trim().is_empty() {
                config.base_url = url.trim_end_matches('/').to_string();
            }
        }
        config
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Clone)]
pub struct YahooFinanceClient {
    config: YahooConfig,
    client: Client,
    rate_limiter: RateLimiter,
    breaker: Arc<CircuitBreaker>,
}

fn map_transport_error(e: reqwest::Error) -> ResearchError {
    if e.is_timeout() {
        ResearchError::Timeout(SERVICE.to_string())
    } else {
        ResearchError::upstream(SERVICE, None, e.to_string())
    }
}

/// Error for a non-success chart response.
pub fn map_status(status: StatusCode, symbol: &str, retry_after: Option<u64>) -> ResearchError {
    match status {
        StatusCode::NOT_FOUND => ResearchError::NotFound(format!("Symbol {} not found", symbol)),
        StatusCode::TOO_MANY_REQUESTS => ResearchError::RateLimited {
            service: SERVICE.to_string(),
            retry_after_secs: retry_after,
        },
        s => ResearchError::upstream(SERVICE, Some(s.as_u16()), format!("HTTP {} for {}", s, symbol)),
    }
}

impl YahooFinanceClient {
    pub fn new(config: YahooConfig) -> Result<Self, ResearchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ResearchError::Configuration(format!("HTTP client: {}", e)))?;

        tracing::info!(
            "Yahoo Finance client: {} (timeout {}s, {} req/min)",
            config.base_url,
            config.timeout.as_secs(),
            config.rate_limit_per_minute
        );

        Ok(Self {
            rate_limiter: RateLimiter::new(config.rate_limit_per_minute, Duration::from_secs(60)),
            breaker: Arc::new(CircuitBreaker::new(
                SERVICE,
                config.breaker_threshold,
                config.breaker_recovery,
            )),
            config,
            client,
        })
    }

    pub fn from_env() -> Result<Self, ResearchError> {
        Self::new(YahooConfig::from_env())
    }

    /// One rate-limited chart request, without retries.
    async fn send_chart_request(
        &self,
        symbol: &str,
        query: &[(&str, &str)],
    ) -> Result<chart::ChartResult, ResearchError> {
        self.rate_limiter.acquire().await;

        let url = format!("{}/v8/finance/chart/{}", self.config.base_url, symbol);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(map_status(status, symbol, retry_after));
        }

        let envelope: chart::ChartEnvelope = response
            .json()
            .await
            .map_err(|e| ResearchError::Parse(format!("Chart response for {}: {}", symbol, e)))?;

        chart::first_result(envelope, symbol)
    }

    /// Chart request with retry, guarded by the circuit breaker.
    async fn fetch_chart(
        &self,
        symbol: &str,
        query: &[(&str, &str)],
    ) -> Result<chart::ChartResult, ResearchError> {
        let label = format!("{} chart {}", SERVICE, symbol);
        self.breaker
            .call(|| {
                retry_async(&self.config.retry, &label, || {
                    self.send_chart_request(symbol, query)
                })
            })
            .await
    }

    /// Latest quote including pre/post-market prices.
    pub async fn get_quote(&self, symbol: &str) -> Result<Quote, ResearchError> {
        let chart = self
            .fetch_chart(
                symbol,
                &[
                    ("range", "1d"),
                    ("interval", "1m"),
                    ("includePrePost", "true"),
                    ("events", "div,splits"),
                ],
            )
            .await?;

        let now = Utc::now();
        let status = MarketSession::for_symbol(symbol).phase(&now);
        let quote = chart::quote_from_chart(symbol, &chart, now, status)?;
        tracing::debug!("Fetched {} @ {} ({:+.2}%)", symbol, quote.price, quote.change_percent);
        Ok(quote)
    }

    /// Historical OHLCV bars, e.g. range "1mo" with interval "1d".
    pub async fn get_history(
        &self,
        symbol: &str,
        range: &str,
        interval: &str,
    ) -> Result<Vec<Bar>, ResearchError> {
        let chart = self
            .fetch_chart(symbol, &[("range", range), ("interval", interval)])
            .await?;
        Ok(chart::bars_from_chart(&chart))
    }

    /// Cheap reachability probe with a short timeout.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/v8/finance/chart/SPY", self.config.base_url);
        match self
            .client
            .get(&url)
            .query(&[("range", "1d"), ("interval", "1d")])
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!("Yahoo Finance health check failed: {}", e);
                false
            }
        }
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.state().await
    }
}

#[async_trait]
impl QuoteProvider for YahooFinanceClient {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, ResearchError> {
        YahooFinanceClient::get_quote(self, symbol).await
    }

    async fn get_history(
        &self,
        symbol: &str,
        range: &str,
        interval: &str,
    ) -> Result<Vec<Bar>, ResearchError> {
        YahooFinanceClient::get_history(self, symbol, range, interval).await
    }

    async fn health_check(&self) -> bool {
        YahooFinanceClient::health_check(self).await
    }

    async fn circuit_state(&self) -> Option<CircuitState> {
        Some(YahooFinanceClient::circuit_state(self).await)
    }
}
