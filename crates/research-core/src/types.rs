use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Trading-session phase for a market at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Open,
    PreMarket,
    AfterHours,
    Closed,
    Holiday,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Open => "open",
            MarketStatus::PreMarket => "pre_market",
            MarketStatus::AfterHours => "after_hours",
            MarketStatus::Closed => "closed",
            MarketStatus::Holiday => "holiday",
        }
    }
}

/// Where a quote came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    YahooFinance,
    Cached,
    StaleCache,
}

/// Point-in-time price snapshot for a ticker symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub previous_close: f64,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub market_cap_display: Option<String>,
    #[serde(default)]
    pub pe_ratio: Option<f64>,
    #[serde(default)]
    pub dividend_yield: Option<f64>,
    #[serde(default)]
    pub fifty_two_week_high: Option<f64>,
    #[serde(default)]
    pub fifty_two_week_low: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source: DataSource,
    pub market_status: MarketStatus,
    #[serde(default)]
    pub is_cached: bool,
    #[serde(default)]
    pub cache_age_seconds: Option<i64>,
}

impl Quote {
    /// Seconds elapsed since the quote was fetched.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds().max(0)
    }
}

/// OHLCV bar data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

/// Recommendation collapsed to its direction, used for voting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Buy,
    Hold,
    Sell,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "STRONG_BUY",
            Recommendation::Buy => "BUY",
            Recommendation::Hold => "HOLD",
            Recommendation::Sell => "SELL",
            Recommendation::StrongSell => "STRONG_SELL",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Recommendation::StrongBuy | Recommendation::Buy => Direction::Buy,
            Recommendation::Hold => Direction::Hold,
            Recommendation::Sell | Recommendation::StrongSell => Direction::Sell,
        }
    }

    /// Lenient parse: accepts "strong buy", "Strong-Buy", "BUY" and similar.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c.to_ascii_uppercase() })
            .collect();
        match normalized.as_str() {
            "STRONG_BUY" => Some(Recommendation::StrongBuy),
            "BUY" | "ACCUMULATE" => Some(Recommendation::Buy),
            "HOLD" | "NEUTRAL" => Some(Recommendation::Hold),
            "SELL" | "REDUCE" => Some(Recommendation::Sell),
            "STRONG_SELL" => Some(Recommendation::StrongSell),
            _ => None,
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recommendation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Recommendation::parse(s).ok_or_else(|| format!("unknown recommendation '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(RiskLevel::Low),
            "MEDIUM" | "MODERATE" => Some(RiskLevel::Medium),
            "HIGH" | "VERY_HIGH" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeHorizon {
    Short,
    Medium,
    Long,
}

impl TimeHorizon {
    pub fn parse(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_ascii_lowercase();
        match lower.trim_end_matches("_term").trim_end_matches("-term") {
            "short" => Some(TimeHorizon::Short),
            "medium" | "mid" => Some(TimeHorizon::Medium),
            "long" => Some(TimeHorizon::Long),
            _ => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            TimeHorizon::Short => "short-term (days to weeks)",
            TimeHorizon::Medium => "medium-term (weeks to months)",
            TimeHorizon::Long => "long-term (months to years)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum RiskTolerance {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

/// Depth of an AI analysis. Deeper analyses go stale sooner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum AnalysisLevel {
    Quick,
    #[default]
    Standard,
    Comprehensive,
}

impl AnalysisLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisLevel::Quick => "quick",
            AnalysisLevel::Standard => "standard",
            AnalysisLevel::Comprehensive => "comprehensive",
        }
    }

    pub fn cache_ttl_secs(&self) -> u64 {
        match self {
            AnalysisLevel::Quick => 3600,
            AnalysisLevel::Standard => 1800,
            AnalysisLevel::Comprehensive => 900,
        }
    }
}

/// One agent's view inside an analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentView {
    /// Confidence in the agent's own call, 0..1
    pub score: f64,
    pub reasoning: String,
    #[serde(default)]
    pub recommendation: Option<Recommendation>,
    #[serde(default)]
    pub target_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Consensus {
    pub recommendation: Recommendation,
    pub confidence: f64,
    /// Share of agents voting in the winning direction
    pub agreement_level: f64,
    pub average_target_price: Option<f64>,
    pub risk_adjustment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Warning,
    Invalid,
    RequiresHumanReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ValidationReport {
    pub status: ValidationStatus,
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn valid() -> Self {
        Self {
            status: ValidationStatus::Valid,
            issues: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Narrative recommendation produced from a quote by the language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StockAnalysis {
    pub symbol: String,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub target_price: Option<f64>,
    pub reasoning: String,
    pub key_factors: Vec<String>,
    pub risks: Vec<String>,
    pub risk_level: RiskLevel,
    pub time_horizon: TimeHorizon,
    /// Per-agent views keyed by agent name
    pub analysis: BTreeMap<String, AgentView>,
    pub consensus: Option<Consensus>,
    pub validation: ValidationReport,
    pub quality_score: f64,
    pub analysis_level: AnalysisLevel,
    pub usage: Option<TokenUsage>,
    pub estimated_cost: f64,
    pub model_used: String,
    pub price_at_analysis: f64,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_cached: bool,
    #[serde(default)]
    pub is_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the model for a JSON object response
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: 0.7,
            max_tokens: None,
            json_mode: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommendation_parse_is_lenient() {
        assert_eq!(Recommendation::parse("strong buy"), Some(Recommendation::StrongBuy));
        assert_eq!(Recommendation::parse("Strong-Sell"), Some(Recommendation::StrongSell));
        assert_eq!(Recommendation::parse(" hold "), Some(Recommendation::Hold));
        assert_eq!(Recommendation::parse("moon"), None);
        assert_eq!("BUY".parse::<Recommendation>(), Ok(Recommendation::Buy));
    }

    #[test]
    fn test_recommendation_serializes_screaming_case() {
        let json = serde_json::to_string(&Recommendation::StrongBuy).unwrap();
        assert_eq!(json, "\"STRONG_BUY\"");
        assert_eq!(Recommendation::StrongSell.direction(), Direction::Sell);
    }

    #[test]
    fn test_time_horizon_accepts_term_suffix() {
        assert_eq!(TimeHorizon::parse("short_term"), Some(TimeHorizon::Short));
        assert_eq!(TimeHorizon::parse("LONG"), Some(TimeHorizon::Long));
        assert_eq!(TimeHorizon::parse("medium-term"), Some(TimeHorizon::Medium));
    }

    #[test]
    fn test_analysis_level_ttl_shrinks_with_depth() {
        assert_eq!(AnalysisLevel::Quick.cache_ttl_secs(), 3600);
        assert_eq!(AnalysisLevel::Standard.cache_ttl_secs(), 1800);
        assert_eq!(AnalysisLevel::Comprehensive.cache_ttl_secs(), 900);
    }

    #[test]
    fn test_market_status_serde() {
        let json = serde_json::to_string(&MarketStatus::PreMarket).unwrap();
        assert_eq!(json, "\"pre_market\"");
    }
}
