//! Spend reports and AI quality metrics.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use cost_tracker::{BudgetAlert, PeriodSummary};
use research_cache::{DailyUsage, QuoteCacheStats, UsageAlert, UsageSnapshot};
use research_core::ResearchError;
use serde::{Deserialize, Serialize};

use crate::{ApiResponse, AppError, AppState};

const MAX_REPORT_DAYS: u32 = 90;

#[derive(Deserialize, utoipa::IntoParams)]
pub struct CostQuery {
    /// Days to cover, 1 to 90 (default 7)
    pub days: Option<u32>,
}

#[derive(Serialize)]
pub struct CostSummary {
    #[serde(flatten)]
    pub period: PeriodSummary,
    pub alerts: Vec<BudgetAlert>,
}

#[derive(Serialize)]
pub struct QualityMetrics {
    pub ai_enabled: bool,
    pub model: Option<String>,
    pub usage: UsageSnapshot,
    pub today: DailyUsage,
    pub alerts: Vec<UsageAlert>,
    pub quote_cache: QuoteCacheStats,
}

pub fn cost_routes() -> Router<AppState> {
    Router::new()
        .route("/api/costs/summary", get(cost_summary))
        .route("/api/quality/metrics", get(quality_metrics))
}

#[utoipa::path(
    get,
    path = "/api/costs/summary",
    params(CostQuery),
    responses(
        (status = 200, description = "Spend over the period with budget status and alerts"),
        (status = 400, description = "days outside 1..=90")
    ),
    tag = "Costs"
)]
pub async fn cost_summary(
    State(state): State<AppState>,
    Query(query): Query<CostQuery>,
) -> Result<Json<ApiResponse<CostSummary>>, AppError> {
    let days = query.days.unwrap_or(7);
    if !(1..=MAX_REPORT_DAYS).contains(&days) {
        return Err(ResearchError::InvalidInput(format!(
            "days must be between 1 and {}",
            MAX_REPORT_DAYS
        ))
        .into());
    }

    let today = Utc::now().date_naive();
    let period = state.reporter.period_summary(today, days).await;
    let alerts = state.budgets.check_budgets().await;

    Ok(Json(ApiResponse::success(CostSummary { period, alerts })))
}

#[utoipa::path(
    get,
    path = "/api/quality/metrics",
    responses((status = 200, description = "AI usage, quality and cache statistics")),
    tag = "Costs"
)]
pub async fn quality_metrics(State(state): State<AppState>) -> Json<ApiResponse<QualityMetrics>> {
    let today = Utc::now().date_naive();

    Json(ApiResponse::success(QualityMetrics {
        ai_enabled: state.analysis.is_some(),
        model: state.analysis.as_ref().map(|e| e.model_name().to_string()),
        usage: state.usage.snapshot().await,
        today: state.usage.daily_summary(today).await,
        alerts: state.usage.alerts().await,
        quote_cache: state.quotes.cache_stats(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{app, body_json, state_with};
    use crate::{build_router, Settings};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_cost_summary_includes_recorded_spend() {
        let state = state_with(Settings::for_testing()).await;
        state
            .costs
            .record_infrastructure("redis", dec!(1.25), "cache node")
            .await;
        let app = build_router(state);

        let response = app.oneshot(get("/api/costs/summary?days=3")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["data"]["total_cost"].as_f64().unwrap() >= 1.25);
        assert_eq!(body["data"]["daily_breakdown"].as_object().unwrap().len(), 3);
        assert!(body["data"]["alerts"].is_array());
    }

    #[tokio::test]
    async fn test_cost_summary_rejects_bad_range() {
        let response = app().await.oneshot(get("/api/costs/summary?days=365")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_quality_metrics_without_ai() {
        let response = app().await.oneshot(get("/api/quality/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["ai_enabled"], false);
        assert_eq!(body["data"]["usage"]["total_requests"], 0);
    }
}
