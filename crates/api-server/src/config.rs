use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CORS_ORIGINS: [&str; 4] = [
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
];

/// Server settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub app_env: String,
    pub log_level: String,
    pub log_json: bool,
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_api_base: Option<String>,
    pub openai_timeout: Duration,
    pub yahoo_timeout: Duration,
    pub yahoo_rate_limit: usize,
    pub cors_origins: Vec<String>,
    pub redis_url: Option<String>,
    pub rate_limit_per_minute: usize,
    pub analysis_rate_limit_per_minute: usize,
    pub batch_max_symbols: usize,
    pub batch_concurrency: usize,
    pub portfolio_cash: Decimal,
    pub ai_daily_budget: Decimal,
    pub monthly_budget: Decimal,
    pub enable_hsts: bool,
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn flag(value: Option<String>) -> bool {
    value
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").unwrap_or_else(|| match get("DATABASE_PATH") {
            Some(path) => format!("sqlite:{}", path),
            None => "sqlite:data/stock_data.db".to_string(),
        });

        let cors_origins = get("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|o| o.trim().trim_end_matches('/').to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect());

        Self {
            app_env: get("APP_ENV").unwrap_or_else(|| "development".to_string()).to_lowercase(),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()).to_lowercase(),
            log_json: get("RUST_LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            host: get("BACKEND_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(get("BACKEND_PORT"), 8000),
            database_url,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            openai_api_base: get("OPENAI_API_BASE"),
            openai_timeout: Duration::from_secs(parse_or(get("OPENAI_TIMEOUT"), 30)),
            yahoo_timeout: Duration::from_secs(parse_or(get("YAHOO_FINANCE_TIMEOUT"), 10)),
            yahoo_rate_limit: parse_or(get("YAHOO_RATE_LIMIT"), 120),
            cors_origins,
            redis_url: get("REDIS_URL"),
            rate_limit_per_minute: parse_or(get("RATE_LIMIT_PER_MINUTE"), 60),
            analysis_rate_limit_per_minute: parse_or(get("ANALYSIS_RATE_LIMIT_PER_MINUTE"), 10),
            batch_max_symbols: parse_or(get("BATCH_MAX_SYMBOLS"), 50),
            batch_concurrency: parse_or(get("BATCH_CONCURRENCY"), 5),
            portfolio_cash: parse_or(get("PORTFOLIO_CASH"), Decimal::ZERO),
            ai_daily_budget: parse_or(get("AI_DAILY_BUDGET"), Decimal::new(1000, 2)),
            monthly_budget: parse_or(get("MONTHLY_BUDGET"), Decimal::new(20000, 2)),
            enable_hsts: flag(get("ENABLE_HSTS")),
        }
    }

    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }

    pub fn ai_enabled(&self) -> bool {
        self.openai_api_key.is_some()
    }

    pub fn backend_url(&self) -> String {
        let host = if self.host == "0.0.0.0" { "localhost" } else { &self.host };
        format!("http://{}:{}", host, self.port)
    }

    /// Required keys that are not set for this environment.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.openai_api_key.is_none() && self.app_env != "testing" {
            missing.push("OPENAI_API_KEY");
        }
        missing
    }

    /// Defaults for tests: no AI, in-memory database and cache.
    pub fn for_testing() -> Self {
        Self::from_lookup(|key| match key {
            "APP_ENV" => Some("testing".to_string()),
            "DATABASE_URL" => Some("sqlite::memory:".to_string()),
            _ => None,
        })
    }
}
