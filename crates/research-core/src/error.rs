use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResearchError {
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited by {service}")]
    RateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    #[error("{service} error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Upstream {
        service: String,
        status: Option<u16>,
        message: String,
    },

    #[error("{0} request timed out")]
    Timeout(String),

    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),
}

impl ResearchError {
    pub fn upstream(service: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        ResearchError::Upstream {
            service: service.to_string(),
            status,
            message: message.into(),
        }
    }

    /// Whether repeating the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResearchError::Timeout(_) | ResearchError::RateLimited { .. } => true,
            // Transport failures carry no status
            ResearchError::Upstream { status: None, .. } => true,
            ResearchError::Upstream { status: Some(s), .. } => *s >= 500,
            _ => false,
        }
    }

    /// Whether the failure should count against a circuit breaker.
    pub fn is_service_failure(&self) -> bool {
        matches!(
            self,
            ResearchError::Timeout(_)
                | ResearchError::RateLimited { .. }
                | ResearchError::Upstream { .. }
                | ResearchError::Parse(_)
        )
    }

    /// Short machine-readable category used in error responses.
    pub fn category(&self) -> &'static str {
        match self {
            ResearchError::InvalidSymbol(_) | ResearchError::InvalidInput(_) => "validation",
            ResearchError::NotFound(_) => "not_found",
            ResearchError::RateLimited { .. } => "rate_limit",
            ResearchError::Upstream { .. }
            | ResearchError::Timeout(_)
            | ResearchError::CircuitOpen(_) => "external_api",
            ResearchError::Parse(_) => "data_format",
            ResearchError::Cache(_) => "cache",
            ResearchError::Database(_) => "database",
            ResearchError::Configuration(_) => "configuration",
            ResearchError::ServiceUnavailable(_) => "unavailable",
            ResearchError::BudgetExceeded(_) => "budget",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ResearchError::Timeout("yahoo".into()).is_retryable());
        assert!(ResearchError::upstream("yahoo", Some(503), "down").is_retryable());
        assert!(ResearchError::upstream("yahoo", None, "connection reset").is_retryable());
        assert!(!ResearchError::upstream("openai", Some(400), "bad request").is_retryable());
        assert!(!ResearchError::NotFound("ZZZZ".into()).is_retryable());
        assert!(!ResearchError::Parse("eof".into()).is_retryable());
    }

    #[test]
    fn test_upstream_display_includes_status() {
        let err = ResearchError::upstream("Yahoo Finance", Some(502), "bad gateway");
        assert_eq!(err.to_string(), "Yahoo Finance error (HTTP 502): bad gateway");
        let err = ResearchError::upstream("Yahoo Finance", None, "dns");
        assert_eq!(err.to_string(), "Yahoo Finance error: dns");
    }
}
