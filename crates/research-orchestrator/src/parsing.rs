//! Lenient decoding of model output into an analysis draft.
//!
//! Models wrap JSON in markdown fences, quote numbers, report confidence as a
//! percentage or leave fields out entirely. Everything recoverable is
//! recovered, and what was missing is reported so validation can judge it.

use research_core::{AgentView, Recommendation, RiskLevel, TimeHorizon};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const AGENT_NAMES: [&str; 3] = ["optimistic", "pessimistic", "risk_manager"];
const DEFAULT_RISK_SCORE: f64 = 50.0;

#[derive(Debug, Clone)]
pub struct ParsedAnalysis {
    pub recommendation: Recommendation,
    pub confidence: f64,
    /// Confidence exactly as the model reported it, before clamping
    pub raw_confidence: Option<f64>,
    pub target_price: Option<f64>,
    pub reasoning: String,
    pub key_factors: Vec<String>,
    pub risks: Vec<String>,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub time_horizon: Option<TimeHorizon>,
    pub agents: BTreeMap<String, AgentView>,
    /// Required fields the model did not supply
    pub missing: Vec<&'static str>,
    /// Recommendation text that could not be mapped
    pub unrecognized_recommendation: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Parsed(ParsedAnalysis),
    /// No JSON object could be recovered
    Unparseable(String),
}

/// Body of a fenced block, or the outermost `{...}` span.
pub fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = match after.get(..4) {
            Some(tag) if tag.eq_ignore_ascii_case("json") => &after[4..],
            _ => after,
        };
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
        return after.trim();
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(s), Some(e)) if e > s => &trimmed[s..=e],
        _ => trimmed,
    }
}

/// Numbers, numeric strings, and strings such as "$185.50" or "72%".
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Null => None,
        Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(|v| text(Some(v))).collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Confidence on a 0..1 scale, accepting 0..100 percentages.
fn normalize_confidence(raw: f64) -> f64 {
    let scaled = if raw > 1.0 && raw <= 100.0 { raw / 100.0 } else { raw };
    scaled.clamp(0.0, 1.0)
}

fn positive_price(value: Option<&Value>) -> Option<f64> {
    value.and_then(number).filter(|p| *p > 0.0)
}

fn agent_views(obj: &Map<String, Value>) -> BTreeMap<String, AgentView> {
    let Some(Value::Object(agents)) = obj.get("agents") else {
        return BTreeMap::new();
    };
    AGENT_NAMES
        .iter()
        .filter_map(|name| {
            let Value::Object(view) = agents.get(*name)? else {
                return None;
            };
            let recommendation = view
                .get("recommendation")
                .and_then(Value::as_str)
                .and_then(Recommendation::parse);
            let score = view
                .get("confidence")
                .or_else(|| view.get("score"))
                .and_then(number)
                .map(normalize_confidence)
                .unwrap_or(0.5);
            Some((
                name.to_string(),
                AgentView {
                    score,
                    reasoning: text(view.get("reasoning")).unwrap_or_default(),
                    recommendation,
                    target_price: positive_price(view.get("target_price")),
                },
            ))
        })
        .collect()
}

pub fn parse_analysis(content: &str) -> ParseOutcome {
    let json = extract_json(content);
    let obj = match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(obj)) => obj,
        Ok(_) | Err(_) => {
            tracing::warn!("Model response is not a JSON object, using neutral result");
            return ParseOutcome::Unparseable(content.to_string());
        }
    };

    let mut missing = Vec::new();

    let rec_text = obj.get("recommendation").and_then(Value::as_str);
    let parsed_rec = rec_text.and_then(Recommendation::parse);
    if rec_text.is_none() {
        missing.push("recommendation");
    }

    let raw_confidence = obj.get("confidence").and_then(number);
    if obj.get("confidence").is_none() {
        missing.push("confidence");
    }

    let reasoning = text(obj.get("reasoning"));
    if reasoning.is_none() {
        missing.push("reasoning");
    }

    let mut key_factors = string_list(obj.get("key_factors"));
    if key_factors.is_empty() {
        key_factors = string_list(obj.get("key_factor"));
    }

    ParseOutcome::Parsed(ParsedAnalysis {
        recommendation: parsed_rec.unwrap_or(Recommendation::Hold),
        confidence: raw_confidence.map(normalize_confidence).unwrap_or(0.5),
        raw_confidence,
        target_price: positive_price(obj.get("target_price").or_else(|| obj.get("price_target"))),
        reasoning: reasoning.unwrap_or_default(),
        key_factors,
        risks: string_list(obj.get("risks")),
        risk_level: text(obj.get("risk_level"))
            .and_then(|r| RiskLevel::parse(&r))
            .unwrap_or(RiskLevel::Medium),
        risk_score: obj
            .get("risk_score")
            .and_then(number)
            .map(|s| s.clamp(0.0, 100.0))
            .unwrap_or(DEFAULT_RISK_SCORE),
        time_horizon: text(obj.get("time_horizon")).and_then(|h| TimeHorizon::parse(&h)),
        agents: agent_views(&obj),
        missing,
        unrecognized_recommendation: rec_text
            .filter(|_| parsed_rec.is_none())
            .map(str::to_string),
    })
}
