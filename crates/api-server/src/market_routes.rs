use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use market_calendar::{Market, MarketSession, SessionReport};
use research_core::ResearchError;
use serde::{Deserialize, Serialize};

use crate::{ApiResponse, AppError, AppState};

#[derive(Deserialize, utoipa::IntoParams)]
pub struct MarketQuery {
    /// Exchange code, NYSE when omitted
    pub market: Option<String>,
}

#[derive(Serialize)]
pub struct SymbolMarketStatus {
    pub symbol: String,
    #[serde(flatten)]
    pub session: SessionReport,
    pub freshness_requirement_seconds: u64,
    pub should_fetch_realtime: bool,
    pub fetch_reason: String,
}

pub fn market_routes() -> Router<AppState> {
    Router::new()
        .route("/api/market/status", get(market_status))
        .route("/api/market/status/:symbol", get(symbol_market_status))
}

#[utoipa::path(
    get,
    path = "/api/market/status",
    params(MarketQuery),
    responses(
        (status = 200, description = "Current session state", body = SessionReport),
        (status = 400, description = "Unknown market code")
    ),
    tag = "Market"
)]
pub async fn market_status(
    Query(query): Query<MarketQuery>,
) -> Result<Json<ApiResponse<SessionReport>>, AppError> {
    let market = match query.market.as_deref() {
        None => Market::Nyse,
        Some(code) => code.parse::<Market>().map_err(ResearchError::InvalidInput)?,
    };
    Ok(Json(ApiResponse::success(MarketSession::new(market).status(&Utc::now()))))
}

#[utoipa::path(
    get,
    path = "/api/market/status/{symbol}",
    params(("symbol" = String, Path, description = "Stock ticker symbol")),
    responses(
        (status = 200, description = "Session state and data freshness for the symbol's market"),
        (status = 400, description = "Invalid symbol")
    ),
    tag = "Market"
)]
pub async fn symbol_market_status(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<SymbolMarketStatus>>, AppError> {
    let symbol = state.quotes.validator().validate(&symbol)?;
    let session = MarketSession::for_symbol(&symbol);
    let now = Utc::now();
    let (should_fetch_realtime, fetch_reason) = session.should_fetch_realtime(&now);

    Ok(Json(ApiResponse::success(SymbolMarketStatus {
        freshness_requirement_seconds: session.freshness_requirement(&now).as_secs(),
        session: session.status(&now),
        should_fetch_realtime,
        fetch_reason,
        symbol,
    })))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{app, body_json};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_market_status_defaults_to_nyse() {
        let response = app().await.oneshot(get("/api/market/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["market"], "NYSE");
        assert_eq!(body["data"]["timezone"], "America/New_York");
    }

    #[tokio::test]
    async fn test_unknown_market_is_rejected() {
        let response = app().await.oneshot(get("/api/market/status?market=MOON")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_symbol_status_uses_suffix_market() {
        let response = app().await.oneshot(get("/api/market/status/0700.HK")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["symbol"], "0700.HK");
        assert_eq!(body["data"]["market"], "HKEX");
        assert!(body["data"]["freshness_requirement_seconds"].as_u64().unwrap() >= 60);
    }
}
