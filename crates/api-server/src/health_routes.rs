use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use market_calendar::Market;
use research_cache::QuoteCacheStats;
use research_core::{CircuitState, SymbolStats};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::{ApiResponse, AppState};

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    fn up(detail: impl Into<String>) -> Self {
        Self {
            status: "healthy",
            detail: Some(detail.into()),
        }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self {
            status: "degraded",
            detail: Some(detail.into()),
        }
    }

    fn down(detail: impl Into<String>) -> Self {
        Self {
            status: "unhealthy",
            detail: Some(detail.into()),
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub environment: String,
    pub uptime_seconds: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: BTreeMap<&'static str, ComponentHealth>,
    pub quote_cache: QuoteCacheStats,
    pub symbols: SymbolStats,
}

#[derive(Serialize)]
pub struct FeatureFlags {
    pub ai_analysis: bool,
    pub redis_cache: bool,
    pub portfolio: bool,
    pub cost_tracking: bool,
    pub hsts: bool,
}

#[derive(Serialize)]
pub struct ClientConfig {
    pub backend_url: String,
    pub environment: String,
    pub version: &'static str,
    pub ai_model: Option<String>,
    pub features: FeatureFlags,
    pub batch_max_symbols: usize,
    pub supported_markets: Vec<&'static str>,
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/config", get(get_config))
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Healthy or degraded"),
        (status = 503, description = "Database unreachable")
    ),
    tag = "System"
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let mut checks = BTreeMap::new();

    let database = match state.db.ping().await {
        Ok(()) => ComponentHealth::up("sqlite"),
        Err(e) => ComponentHealth::down(e.to_string()),
    };
    checks.insert("database", database);

    let cache = match state.store.ping().await {
        Ok(()) => ComponentHealth::up(state.store.backend()),
        Err(e) => ComponentHealth::degraded(e.to_string()),
    };
    checks.insert("cache", cache);

    let openai = match &state.analysis {
        Some(engine) => ComponentHealth::up(engine.model_name()),
        None => ComponentHealth::degraded("OPENAI_API_KEY not configured"),
    };
    checks.insert("openai", openai);

    let quotes = match state.quotes.provider().circuit_state().await {
        Some(CircuitState::Open) => ComponentHealth::degraded("circuit breaker open"),
        Some(CircuitState::HalfOpen) => ComponentHealth::degraded("circuit breaker half-open"),
        _ => ComponentHealth::up(state.quotes.provider().name()),
    };
    checks.insert("quote_provider", quotes);

    let status = if checks.values().any(|c| c.status == "unhealthy") {
        "unhealthy"
    } else if checks.values().any(|c| c.status == "degraded") {
        "degraded"
    } else {
        "healthy"
    };
    let code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            environment: state.settings.app_env.clone(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
            timestamp: chrono::Utc::now(),
            checks,
            quote_cache: state.quotes.cache_stats(),
            symbols: state.quotes.validator().stats(),
        }),
    )
}

#[utoipa::path(
    get,
    path = "/api/config",
    responses((status = 200, description = "Client-safe configuration")),
    tag = "System"
)]
pub async fn get_config(State(state): State<AppState>) -> Json<ApiResponse<ClientConfig>> {
    let settings = &state.settings;
    Json(ApiResponse::success(ClientConfig {
        backend_url: settings.backend_url(),
        environment: settings.app_env.clone(),
        version: env!("CARGO_PKG_VERSION"),
        ai_model: state.analysis.as_ref().map(|e| e.model_name().to_string()),
        features: FeatureFlags {
            ai_analysis: state.analysis.is_some(),
            redis_cache: state.store.backend() == "redis",
            portfolio: true,
            cost_tracking: true,
            hsts: settings.enable_hsts,
        },
        batch_max_symbols: settings.batch_max_symbols,
        supported_markets: Market::ALL.iter().map(|m| m.code()).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{app, body_json};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_is_degraded_without_openai() {
        let response = app()
            .await
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");

        let body = body_json(response).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["checks"]["database"]["status"], "healthy");
        assert_eq!(body["checks"]["cache"]["detail"], "memory");
        assert_eq!(body["checks"]["openai"]["status"], "degraded");
    }

    #[tokio::test]
    async fn test_config_is_client_safe() {
        let response = app()
            .await
            .oneshot(Request::builder().uri("/api/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["environment"], "testing");
        assert_eq!(body["data"]["features"]["ai_analysis"], false);
        assert!(body["data"]["ai_model"].is_null());
        assert!(!body.to_string().contains("OPENAI_API_KEY"));
    }
}
