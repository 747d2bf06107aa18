//! AI analysis endpoints.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use research_core::{AnalysisLevel, ResearchError, RiskTolerance, StockAnalysis, TimeHorizon};
use research_orchestrator::{AnalysisEngine, AnalysisOptions, BatchAnalysis};
use research_store::AnalysisRecord;
use serde::Deserialize;
use std::sync::Arc;

use crate::rate_limit::{apply_headers, ClientIp};
use crate::{ApiResponse, AppError, AppState};

const MAX_BATCH_ANALYSIS: usize = 10;
const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct AnalysisRequest {
    /// short, medium or long (a `_term` suffix is accepted)
    pub time_horizon: Option<String>,
    pub risk_tolerance: Option<RiskTolerance>,
    pub analysis_level: Option<AnalysisLevel>,
    pub force_refresh: Option<bool>,
}

impl AnalysisRequest {
    fn into_options(self) -> Result<AnalysisOptions, ResearchError> {
        let mut options = AnalysisOptions::default();
        if let Some(raw) = self.time_horizon {
            options.time_horizon = TimeHorizon::parse(&raw)
                .ok_or_else(|| ResearchError::InvalidInput(format!("Unknown time horizon: {}", raw)))?;
        }
        if let Some(tolerance) = self.risk_tolerance {
            options.risk_tolerance = tolerance;
        }
        if let Some(level) = self.analysis_level {
            options.level = level;
        }
        options.force_refresh = self.force_refresh.unwrap_or(false);
        Ok(options)
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct BatchAnalysisRequest {
    pub symbols: Vec<String>,
    #[serde(default)]
    pub analysis_level: AnalysisLevel,
}

#[derive(Deserialize, utoipa::IntoParams)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/api/analysis/batch", post(batch_analysis))
        .route("/api/analysis/:symbol", post(analyze_stock))
        .route("/api/analysis/:symbol/history", get(analysis_history))
}

fn engine(state: &AppState) -> Result<Arc<AnalysisEngine>, AppError> {
    state.analysis.clone().ok_or_else(|| {
        ResearchError::ServiceUnavailable("AI analysis is not configured (OPENAI_API_KEY missing)".to_string())
            .into()
    })
}

async fn persist(state: &AppState, analysis: &StockAnalysis) {
    if analysis.is_cached {
        return;
    }
    if let Err(e) = state.analysis_history.record(analysis).await {
        tracing::warn!("Failed to store analysis for {}: {}", analysis.symbol, e);
    }
}

#[utoipa::path(
    post,
    path = "/api/analysis/{symbol}",
    params(("symbol" = String, Path, description = "Stock ticker symbol")),
    request_body(content = AnalysisRequest, description = "Optional analysis parameters"),
    responses(
        (status = 200, description = "Analysis result", body = StockAnalysis),
        (status = 400, description = "Invalid symbol or parameters"),
        (status = 402, description = "AI budget exhausted"),
        (status = 429, description = "Analysis rate limit exceeded"),
        (status = 503, description = "AI analysis not configured")
    ),
    tag = "Analysis"
)]
pub async fn analyze_stock(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    client: Option<Extension<ClientIp>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let engine = engine(&state)?;

    let request: AnalysisRequest = if body.iter().all(u8::is_ascii_whitespace) {
        AnalysisRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ResearchError::InvalidInput(format!("Invalid request body: {}", e)))?
    };
    let options = request.into_options()?;

    let ip = client.map(|Extension(c)| c.0).unwrap_or_else(|| "unknown".to_string());
    let decision = state.analysis_limiter.check(&ip, "analysis").await;
    if !decision.allowed {
        tracing::warn!("Analysis rate limit exceeded for {}", ip);
        let mut response = AppError::from(ResearchError::RateLimited {
            service: "analysis".to_string(),
            retry_after_secs: decision.retry_after_secs,
        })
        .into_response();
        apply_headers(response.headers_mut(), &decision);
        return Ok(response);
    }

    let analysis = engine.analyze(&symbol, &options).await?;
    persist(&state, &analysis).await;

    tracing::info!(
        symbol = %analysis.symbol,
        recommendation = ?analysis.recommendation,
        confidence = analysis.confidence,
        cached = analysis.is_cached,
        fallback = analysis.is_fallback,
        "Analysis served"
    );

    Ok(Json(ApiResponse::success(analysis)).into_response())
}

#[utoipa::path(
    post,
    path = "/api/analysis/batch",
    request_body = BatchAnalysisRequest,
    responses(
        (status = 200, description = "Per-symbol analyses in request order"),
        (status = 400, description = "Empty or oversized batch"),
        (status = 503, description = "AI analysis not configured")
    ),
    tag = "Analysis"
)]
pub async fn batch_analysis(
    State(state): State<AppState>,
    Json(request): Json<BatchAnalysisRequest>,
) -> Result<Json<ApiResponse<Vec<BatchAnalysis>>>, AppError> {
    let engine = engine(&state)?;

    if request.symbols.is_empty() {
        return Err(ResearchError::InvalidInput("No symbols provided".to_string()).into());
    }
    if request.symbols.len() > MAX_BATCH_ANALYSIS {
        return Err(ResearchError::InvalidInput(format!(
            "Too many symbols: {} (max {})",
            request.symbols.len(),
            MAX_BATCH_ANALYSIS
        ))
        .into());
    }

    let results = engine.analyze_batch(&request.symbols, request.analysis_level).await;
    for analysis in results.iter().filter_map(|r| r.data.as_ref()) {
        persist(&state, analysis).await;
    }

    Ok(Json(ApiResponse::success(results)))
}

#[utoipa::path(
    get,
    path = "/api/analysis/{symbol}/history",
    params(("symbol" = String, Path, description = "Stock ticker symbol"), HistoryQuery),
    responses((status = 200, description = "Stored analyses, newest first")),
    tag = "Analysis"
)]
pub async fn analysis_history(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<AnalysisRecord>>>, AppError> {
    let symbol = state.quotes.validator().validate(&symbol)?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    let records = state.analysis_history.recent(&symbol, limit).await?;
    Ok(Json(ApiResponse::success(records)))
}
