use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use research_store::{PortfolioSummary, Position, PositionInput};
use std::collections::HashMap;

use crate::{ApiResponse, AppError, AppState};

pub fn portfolio_routes() -> Router<AppState> {
    Router::new()
        .route("/api/portfolio/summary", get(get_summary))
        .route("/api/portfolio/positions", get(list_positions).post(add_position))
        .route("/api/portfolio/positions/:symbol", delete(delete_position))
}

#[utoipa::path(
    get,
    path = "/api/portfolio/summary",
    responses((status = 200, description = "Positions valued at live prices", body = PortfolioSummary)),
    tag = "Portfolio"
)]
pub async fn get_summary(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<PortfolioSummary>>, AppError> {
    let positions = state.portfolio.get_all_positions().await?;
    let symbols: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();

    let quotes: HashMap<_, _> = if symbols.is_empty() {
        HashMap::new()
    } else {
        state
            .quotes
            .get_quotes(&symbols, false)
            .await
            .into_iter()
            .filter_map(|r| {
                if r.data.is_none() {
                    tracing::warn!(
                        "No price for {}, valuing at cost: {}",
                        r.symbol,
                        r.error.as_deref().unwrap_or("unknown error")
                    );
                }
                r.data.map(|q| (r.symbol, q))
            })
            .collect()
    };

    let summary = state.portfolio.summary(&quotes, state.settings.portfolio_cash).await?;
    Ok(Json(ApiResponse::success(summary)))
}

#[utoipa::path(
    get,
    path = "/api/portfolio/positions",
    responses((status = 200, description = "All open positions")),
    tag = "Portfolio"
)]
pub async fn list_positions(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Position>>>, AppError> {
    let positions = state.portfolio.get_all_positions().await?;
    Ok(Json(ApiResponse::success(positions)))
}

#[utoipa::path(
    post,
    path = "/api/portfolio/positions",
    request_body = PositionInput,
    responses(
        (status = 201, description = "Position created or merged", body = Position),
        (status = 400, description = "Invalid symbol, shares or price")
    ),
    tag = "Portfolio"
)]
pub async fn add_position(
    State(state): State<AppState>,
    Json(mut input): Json<PositionInput>,
) -> Result<(StatusCode, Json<ApiResponse<Position>>), AppError> {
    input.symbol = state.quotes.validator().validate(&input.symbol)?;
    let position = state.portfolio.add_position(input).await?;
    tracing::info!(
        "Position {} now {} shares @ {}",
        position.symbol,
        position.shares,
        position.average_cost
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::success(position))))
}

#[utoipa::path(
    delete,
    path = "/api/portfolio/positions/{symbol}",
    params(("symbol" = String, Path, description = "Stock ticker symbol")),
    responses(
        (status = 200, description = "Position removed"),
        (status = 404, description = "No such position")
    ),
    tag = "Portfolio"
)]
pub async fn delete_position(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<String>>, AppError> {
    let symbol = state.quotes.validator().validate(&symbol)?;
    state.portfolio.delete_position(&symbol).await?;
    Ok(Json(ApiResponse::success(format!("Position {} deleted", symbol))))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{body_json, state_with};
    use crate::{build_router, Settings};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    fn add(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/portfolio/positions")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_add_list_and_summarize() {
        let mut settings = Settings::for_testing();
        settings.portfolio_cash = dec!(500);
        let app = build_router(state_with(settings).await);

        let created = app
            .clone()
            .oneshot(add(r#"{"symbol": "aapl", "shares": 10, "price": 150}"#))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);

        let merged = app
            .clone()
            .oneshot(add(r#"{"symbol": "AAPL", "shares": 10, "price": 170}"#))
            .await
            .unwrap();
        let body = body_json(merged).await;
        assert_eq!(body["data"]["shares"], 20.0);
        assert_eq!(body["data"]["average_cost"], 160.0);

        let list = body_json(app.clone().oneshot(get("/api/portfolio/positions")).await.unwrap()).await;
        assert_eq!(list["data"].as_array().unwrap().len(), 1);

        // 20 shares at the fixed 190 price, plus cash
        let summary = body_json(app.oneshot(get("/api/portfolio/summary")).await.unwrap()).await;
        assert_eq!(summary["data"]["total_value"], 4300.0);
        assert_eq!(summary["data"]["cost_basis"], 3200.0);
        assert_eq!(summary["data"]["unrealized_pnl"], 600.0);
        assert_eq!(summary["data"]["position_count"], 1);
    }

    #[tokio::test]
    async fn test_invalid_positions_are_rejected() {
        let app = build_router(state_with(Settings::for_testing()).await);

        let bad_symbol = app.clone().oneshot(add(r#"{"symbol": "$$", "shares": 1, "price": 10}"#)).await.unwrap();
        assert_eq!(bad_symbol.status(), StatusCode::BAD_REQUEST);

        let bad_shares = app.clone().oneshot(add(r#"{"symbol": "MSFT", "shares": -1, "price": 10}"#)).await.unwrap();
        assert_eq!(bad_shares.status(), StatusCode::BAD_REQUEST);

        let missing = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/portfolio/positions/MSFT")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
