//! HTTP surface of the stock research backend.

use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, Method, Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    Json, Router,
};
use chrono::{DateTime, Utc};
use cost_tracker::{AlertLevel, BudgetManager, CostReporter, CostTracker};
use openai_client::{OpenAIClient, OpenAIConfig};
use research_cache::{CacheStore, RateLimiter, UsageMonitor};
use research_core::{ChatModel, QuoteProvider, ResearchError};
use research_orchestrator::{AnalysisEngine, QuoteService};
use research_store::{AnalysisHistory, PortfolioManager, QuoteHistory, ResearchDb, StoreError};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use yahoo_client::{YahooConfig, YahooFinanceClient};

pub mod analysis_routes;
pub mod config;
pub mod cost_routes;
pub mod health_routes;
pub mod market_routes;
pub mod portfolio_routes;
pub mod rate_limit;
pub mod request_id;
pub mod security_headers;
pub mod stock_routes;

pub use config::Settings;

/// Whether internal error messages may be shown to clients.
static EXPOSE_ERRORS: AtomicBool = AtomicBool::new(false);

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub quotes: Arc<QuoteService>,
    /// None when no OpenAI key is configured
    pub analysis: Option<Arc<AnalysisEngine>>,
    pub store: Arc<dyn CacheStore>,
    pub db: ResearchDb,
    pub quote_history: Arc<QuoteHistory>,
    pub analysis_history: Arc<AnalysisHistory>,
    pub portfolio: Arc<PortfolioManager>,
    pub costs: Arc<CostTracker>,
    pub budgets: Arc<BudgetManager>,
    pub reporter: Arc<CostReporter>,
    pub usage: Arc<UsageMonitor>,
    pub api_limiter: Arc<RateLimiter>,
    pub analysis_limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the services around an already-built provider, model, cache store and database.
    pub fn new(
        settings: Settings,
        provider: Arc<dyn QuoteProvider>,
        model: Option<Arc<dyn ChatModel>>,
        store: Arc<dyn CacheStore>,
        db: ResearchDb,
    ) -> Self {
        EXPOSE_ERRORS.store(settings.is_development(), Ordering::Relaxed);

        let costs = Arc::new(CostTracker::new(store.clone()));
        let budgets = Arc::new(BudgetManager::with_limits(
            costs.clone(),
            settings.ai_daily_budget,
            settings.monthly_budget,
        ));
        let usage = Arc::new(UsageMonitor::new(store.clone()));

        let quotes = Arc::new(
            QuoteService::new(provider, store.clone())
                .with_cost_tracker(costs.clone())
                .with_batch_concurrency(settings.batch_concurrency),
        );

        let analysis = model.map(|model| {
            Arc::new(
                AnalysisEngine::new(model, quotes.clone(), store.clone())
                    .with_usage_monitor(usage.clone())
                    .with_cost_controls(costs.clone(), budgets.clone()),
            )
        });

        Self {
            quotes,
            analysis,
            quote_history: Arc::new(QuoteHistory::new(db.clone())),
            analysis_history: Arc::new(AnalysisHistory::new(db.clone())),
            portfolio: Arc::new(PortfolioManager::new(db.clone())),
            reporter: Arc::new(CostReporter::new(costs.clone(), budgets.clone())),
            api_limiter: Arc::new(RateLimiter::per_minute(store.clone(), settings.rate_limit_per_minute)),
            analysis_limiter: Arc::new(RateLimiter::per_minute(
                store.clone(),
                settings.analysis_rate_limit_per_minute,
            )),
            settings: Arc::new(settings),
            store,
            db,
            costs,
            budgets,
            usage,
            started_at: Instant::now(),
        }
    }
}

/// Envelope for every JSON response except `/health`.
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    category: &'static str,
    timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub enum AppError {
    Research(ResearchError),
    Internal(anyhow::Error),
}

impl From<ResearchError> for AppError {
    fn from(err: ResearchError) -> Self {
        AppError::Research(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Research(err.into())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        let AppError::Research(err) = self else {
            return StatusCode::INTERNAL_SERVER_ERROR;
        };
        match err {
            ResearchError::InvalidSymbol(_) | ResearchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ResearchError::NotFound(_) => StatusCode::NOT_FOUND,
            ResearchError::BudgetExceeded(_) => StatusCode::PAYMENT_REQUIRED,
            ResearchError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ResearchError::Upstream { .. }
            | ResearchError::CircuitOpen(_)
            | ResearchError::Timeout(_)
            | ResearchError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ResearchError::Parse(_) => StatusCode::BAD_GATEWAY,
            ResearchError::Cache(_) | ResearchError::Database(_) | ResearchError::Configuration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn category(&self) -> &'static str {
        match self {
            AppError::Research(err) => err.category(),
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Research(err) => err.to_string(),
            AppError::Internal(err) => err.to_string(),
        };

        if status.is_server_error() {
            tracing::error!("Request failed ({}): {}", status, message);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, message);
        }

        let error = if status == StatusCode::INTERNAL_SERVER_ERROR
            && !EXPOSE_ERRORS.load(Ordering::Relaxed)
        {
            "Internal server error".to_string()
        } else {
            message
        };

        let retry_after = match &self {
            AppError::Research(ResearchError::RateLimited { retry_after_secs, .. }) => *retry_after_secs,
            _ => None,
        };

        let body = ErrorBody {
            success: false,
            error,
            category: self.category(),
            timestamp: Utc::now(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Stock Research API",
        description = "Quotes, AI analysis, market calendar, portfolio and cost tracking"
    ),
    paths(
        health_routes::health,
        health_routes::get_config,
        stock_routes::get_quote,
        stock_routes::batch_quotes,
        stock_routes::get_history,
        stock_routes::validate_symbol,
        analysis_routes::analyze_stock,
        analysis_routes::batch_analysis,
        analysis_routes::analysis_history,
        market_routes::market_status,
        market_routes::symbol_market_status,
        portfolio_routes::get_summary,
        portfolio_routes::list_positions,
        portfolio_routes::add_position,
        portfolio_routes::delete_position,
        cost_routes::cost_summary,
        cost_routes::quality_metrics,
    ),
    components(schemas(
        research_core::Quote,
        research_core::Bar,
        research_core::StockAnalysis,
        research_core::SymbolInfo,
        research_orchestrator::BatchQuote,
        research_orchestrator::BatchAnalysis,
        market_calendar::SessionReport,
        research_store::Position,
        research_store::PositionInput,
        research_store::PortfolioSummary,
        research_store::AnalysisRecord,
        analysis_routes::AnalysisRequest,
        analysis_routes::BatchAnalysisRequest,
    )),
    tags(
        (name = "System", description = "Health and client configuration"),
        (name = "Stocks", description = "Quotes, history and symbol validation"),
        (name = "Analysis", description = "AI stock analysis"),
        (name = "Market", description = "Trading sessions"),
        (name = "Portfolio", description = "Positions and valuation"),
        (name = "Costs", description = "Spend and AI quality metrics"),
    )
)]
pub struct ApiDoc;

fn cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {}", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
        ])
        .max_age(Duration::from_secs(3600))
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings);

    Router::new()
        .merge(health_routes::health_routes())
        .merge(stock_routes::stock_routes())
        .merge(analysis_routes::analysis_routes())
        .merge(market_routes::market_routes())
        .merge(portfolio_routes::portfolio_routes())
        .merge(cost_routes::cost_routes())
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit::rate_limit_middleware))
        .with_state(state.clone())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn_with_state(
            state,
            security_headers::security_headers_middleware,
        ))
        .layer(middleware::from_fn(request_id::request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = tracing::field::Empty,
            )
        }))
}

fn init_tracing(settings: &Settings) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level));

    let result = if settings.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

fn spawn_background_tasks(state: &AppState) {
    let budgets = state.budgets.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            for alert in budgets.check_budgets().await {
                match alert.alert_level {
                    AlertLevel::Critical | AlertLevel::Emergency => tracing::error!(
                        "Budget {} at {:.1}% (${} of ${})",
                        alert.budget_name,
                        alert.usage_percentage,
                        alert.current_cost,
                        alert.budget_limit
                    ),
                    _ => tracing::warn!(
                        "Budget {} at {:.1}% (${} of ${})",
                        alert.budget_name,
                        alert.usage_percentage,
                        alert.current_cost,
                        alert.budget_limit
                    ),
                }
            }
        }
    });

    let state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let cache_ok = state.store.ping().await.is_ok();
            let breaker = state.quotes.provider().circuit_state().await;
            let stats = state.quotes.cache_stats();
            tracing::info!(
                cache_backend = state.store.backend(),
                cache_ok,
                breaker = ?breaker,
                cached_quotes = stats.local_entries,
                "Periodic health check"
            );
            for alert in state.usage.alerts().await {
                tracing::warn!("AI usage alert {}: {}", alert.kind, alert.message);
            }
            let purged = state.quotes.validator().cleanup_failed(chrono::Duration::seconds(3600));
            if purged > 0 {
                tracing::debug!("Dropped {} stale failed-symbol entries", purged);
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env();
    init_tracing(&settings);

    for key in settings.missing_required() {
        tracing::warn!("{} is not set", key);
    }

    let db = ResearchDb::new(&settings.database_url).await?;
    let store = research_cache::connect(settings.redis_url.as_deref()).await;

    let mut yahoo_config = YahooConfig::from_env().with_timeout(settings.yahoo_timeout);
    yahoo_config.rate_limit_per_minute = settings.yahoo_rate_limit;
    let provider: Arc<dyn QuoteProvider> = Arc::new(YahooFinanceClient::new(yahoo_config)?);

    let model: Option<Arc<dyn ChatModel>> = match &settings.openai_api_key {
        Some(key) => {
            let mut config = OpenAIConfig::new(key.clone())
                .with_model(settings.openai_model.clone())
                .with_timeout(settings.openai_timeout.as_secs());
            if let Some(base) = &settings.openai_api_base {
                config = config.with_api_base(base.clone());
            }
            tracing::info!("AI analysis enabled with {}", config.model);
            let client: Arc<dyn ChatModel> = Arc::new(OpenAIClient::with_config(config)?);
            Some(client)
        }
        None => {
            tracing::warn!("AI analysis disabled: OPENAI_API_KEY not configured");
            None
        }
    };

    let bind = (settings.host.clone(), settings.port);
    tracing::info!(
        "Starting stock research API in {} mode on {}:{}",
        settings.app_env,
        bind.0,
        bind.1
    );

    let state = AppState::new(settings, provider, model, store, db);
    spawn_background_tasks(&state);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use research_cache::MemoryStore;
    use research_core::{Bar, DataSource, MarketStatus, Quote};

    /// Quotes at a fixed price for any symbol except `ZZZZ`.
    pub struct FixedProvider;

    pub fn quote(symbol: &str) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            price: 190.0,
            change: 2.0,
            change_percent: 1.06,
            volume: 48_000_000,
            open: 188.5,
            high: 191.2,
            low: 187.9,
            previous_close: 188.0,
            market_cap: Some(2.9e12),
            market_cap_display: Some("2.90T".to_string()),
            pe_ratio: Some(29.1),
            dividend_yield: Some(0.5),
            fifty_two_week_high: Some(199.6),
            fifty_two_week_low: Some(164.1),
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
    impl QuoteProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn get_quote(&self, symbol: &str) -> Result<Quote, ResearchError> {
            if symbol == "ZZZZ" {
                return Err(ResearchError::NotFound(format!("Symbol {} not found", symbol)));
            }
            Ok(quote(symbol))
        }

        async fn get_history(
            &self,
            symbol: &str,
            _range: &str,
            _interval: &str,
        ) -> Result<Vec<Bar>, ResearchError> {
            let q = quote(symbol);
            Ok(vec![Bar {
                timestamp: q.timestamp,
                open: q.open,
                high: q.high,
                low: q.low,
                close: q.price,
                volume: q.volume,
            }])
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    pub async fn state_with(settings: Settings) -> AppState {
        let db = ResearchDb::new("sqlite::memory:").await.unwrap();
        AppState::new(settings, Arc::new(FixedProvider), None, Arc::new(MemoryStore::new()), db)
    }

    pub async fn app() -> Router {
        build_router(state_with(Settings::for_testing()).await)
    }

    pub async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
