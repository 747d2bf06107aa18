//! Quote endpoints.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use research_core::{Bar, Quote, ResearchError, SymbolInfo};
use research_orchestrator::BatchQuote;
use serde::{Deserialize, Serialize};

use crate::{ApiResponse, AppError, AppState};

const VALID_RANGES: [&str; 11] = ["1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max"];
const VALID_INTERVALS: [&str; 13] = [
    "1m", "2m", "5m", "15m", "30m", "60m", "90m", "1h", "1d", "5d", "1wk", "1mo", "3mo",
];

#[derive(Deserialize, utoipa::IntoParams)]
pub struct QuoteQuery {
    /// Bypass the quote cache
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Deserialize, utoipa::IntoParams)]
pub struct HistoryQuery {
    pub range: Option<String>,
    pub interval: Option<String>,
}

/// Either a bare list of symbols or an object wrapping one.
#[derive(Deserialize, utoipa::ToSchema)]
#[serde(untagged)]
pub enum BatchQuoteRequest {
    List(Vec<String>),
    Object {
        symbols: Vec<String>,
        #[serde(default)]
        refresh: bool,
    },
}

impl BatchQuoteRequest {
    fn into_parts(self) -> (Vec<String>, bool) {
        match self {
            BatchQuoteRequest::List(symbols) => (symbols, false),
            BatchQuoteRequest::Object { symbols, refresh } => (symbols, refresh),
        }
    }
}

#[derive(Serialize)]
pub struct BatchQuoteResponse {
    pub results: Vec<BatchQuote>,
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub symbol: String,
    pub range: String,
    pub interval: String,
    pub bars: Vec<Bar>,
}

pub fn stock_routes() -> Router<AppState> {
    Router::new()
        .route("/api/stocks/batch", post(batch_quotes))
        .route("/api/stocks/:symbol", get(get_quote))
        .route("/api/stocks/:symbol/history", get(get_history))
        .route("/api/symbols/:symbol/validate", get(validate_symbol))
}

#[utoipa::path(
    get,
    path = "/api/stocks/{symbol}",
    params(("symbol" = String, Path, description = "Stock ticker symbol"), QuoteQuery),
    responses(
        (status = 200, description = "Current quote", body = Quote),
        (status = 400, description = "Invalid symbol"),
        (status = 404, description = "Unknown symbol"),
        (status = 503, description = "Quote provider unavailable")
    ),
    tag = "Stocks"
)]
pub async fn get_quote(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<QuoteQuery>,
) -> Result<Json<ApiResponse<Quote>>, AppError> {
    let quote = state.quotes.get_quote(&symbol, query.refresh).await?;

    if !quote.is_cached {
        if let Err(e) = state.quote_history.record(&quote).await {
            tracing::warn!("Failed to store quote snapshot for {}: {}", quote.symbol, e);
        }
    }

    Ok(Json(ApiResponse::success(quote)))
}

#[utoipa::path(
    post,
    path = "/api/stocks/batch",
    request_body = BatchQuoteRequest,
    responses(
        (status = 200, description = "Per-symbol results in request order"),
        (status = 400, description = "Empty or oversized batch")
    ),
    tag = "Stocks"
)]
pub async fn batch_quotes(
    State(state): State<AppState>,
    Json(request): Json<BatchQuoteRequest>,
) -> Result<Json<ApiResponse<BatchQuoteResponse>>, AppError> {
    let (symbols, refresh) = request.into_parts();
    let max = state.settings.batch_max_symbols;

    if symbols.is_empty() {
        return Err(ResearchError::InvalidInput("No symbols provided".to_string()).into());
    }
    if symbols.len() > max {
        return Err(ResearchError::InvalidInput(format!(
            "Too many symbols: {} (max {})",
            symbols.len(),
            max
        ))
        .into());
    }

    let results = state.quotes.get_quotes(&symbols, refresh).await;
    let succeeded = results.iter().filter(|r| r.success).count();
    tracing::info!("Batch quote: {}/{} succeeded", succeeded, results.len());

    Ok(Json(ApiResponse::success(BatchQuoteResponse {
        requested: symbols.len(),
        failed: results.len() - succeeded,
        succeeded,
        results,
    })))
}

#[utoipa::path(
    get,
    path = "/api/stocks/{symbol}/history",
    params(("symbol" = String, Path, description = "Stock ticker symbol"), HistoryQuery),
    responses(
        (status = 200, description = "OHLCV bars"),
        (status = 400, description = "Invalid symbol, range or interval")
    ),
    tag = "Stocks"
)]
pub async fn get_history(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<HistoryResponse>>, AppError> {
    let range = query.range.unwrap_or_else(|| "1mo".to_string());
    let interval = query.interval.unwrap_or_else(|| "1d".to_string());

    if !VALID_RANGES.contains(&range.as_str()) {
        return Err(ResearchError::InvalidInput(format!("Unsupported range: {}", range)).into());
    }
    if !VALID_INTERVALS.contains(&interval.as_str()) {
        return Err(ResearchError::InvalidInput(format!("Unsupported interval: {}", interval)).into());
    }

    let bars = state.quotes.get_history(&symbol, &range, &interval).await?;

    Ok(Json(ApiResponse::success(HistoryResponse {
        symbol: research_core::SymbolValidator::normalize(&symbol),
        range,
        interval,
        bars,
    })))
}

#[utoipa::path(
    get,
    path = "/api/symbols/{symbol}/validate",
    params(("symbol" = String, Path, description = "Stock ticker symbol")),
    responses((status = 200, description = "Validation status for the symbol", body = SymbolInfo)),
    tag = "Stocks"
)]
pub async fn validate_symbol(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Json<ApiResponse<SymbolInfo>> {
    Json(ApiResponse::success(state.quotes.validator().info(&symbol)))
}
