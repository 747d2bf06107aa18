use chrono::Utc;
use research_core::{
    AnalysisLevel, Quote, Recommendation, RiskLevel, StockAnalysis, TimeHorizon, ValidationReport,
    ValidationStatus,
};
use std::collections::BTreeMap;

const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Recommendation from the day's price move alone.
pub fn rule_based_recommendation(change_percent: f64) -> Recommendation {
    if change_percent > 5.0 {
        Recommendation::StrongBuy
    } else if change_percent > 2.0 {
        Recommendation::Buy
    } else if change_percent < -5.0 {
        Recommendation::StrongSell
    } else if change_percent < -2.0 {
        Recommendation::Sell
    } else {
        Recommendation::Hold
    }
}

fn move_risk(change_percent: f64) -> RiskLevel {
    match change_percent.abs() {
        m if m > 5.0 => RiskLevel::High,
        m if m > 2.0 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

/// Analysis served when the language model cannot be reached.
pub fn rule_based_analysis(
    quote: &Quote,
    level: AnalysisLevel,
    horizon: TimeHorizon,
    reason: &str,
) -> StockAnalysis {
    let recommendation = rule_based_recommendation(quote.change_percent);
    StockAnalysis {
        symbol: quote.symbol.clone(),
        recommendation,
        confidence: FALLBACK_CONFIDENCE,
        target_price: None,
        reasoning: format!(
            "AI analysis unavailable. Rule-based view from today's move of {:+.2}% at {:.2}.",
            quote.change_percent, quote.price
        ),
        key_factors: vec![format!("Daily price change {:+.2}%", quote.change_percent)],
        risks: vec!["Recommendation ignores fundamentals and news".to_string()],
        risk_level: move_risk(quote.change_percent),
        time_horizon: horizon,
        analysis: BTreeMap::new(),
        consensus: None,
        validation: ValidationReport {
            status: ValidationStatus::Warning,
            issues: vec![format!("Warning: Fallback analysis ({})", reason)],
        },
        quality_score: 0.0,
        analysis_level: level,
        usage: None,
        estimated_cost: 0.0,
        model_used: "rule-based".to_string(),
        price_at_analysis: quote.price,
        processing_time_ms: 0,
        timestamp: Utc::now(),
        is_cached: false,
        is_fallback: true,
        fallback_reason: Some(reason.to_string()),
        raw_response: None,
    }
}
