use research_core::{AnalysisLevel, ChatMessage, ChatRequest, Quote, RiskTolerance, TimeHorizon};

pub const ANALYSIS_TEMPERATURE: f32 = 0.3;
pub const ANALYSIS_MAX_TOKENS: u32 = 1000;

const OPTIMISTIC_BRIEF: &str = "The optimistic analyst looks for growth drivers, competitive \
advantages, positive momentum and upside catalysts.";

const PESSIMISTIC_BRIEF: &str = "The pessimistic analyst looks for overvaluation, deteriorating \
fundamentals, competitive threats and downside catalysts.";

const RISK_MANAGER_BRIEF: &str = "The risk manager weighs volatility, liquidity, concentration \
and event risk, and scores overall risk from 0 (negligible) to 100 (extreme).";

fn system_prompt(level: AnalysisLevel) -> String {
    let panel = match level {
        AnalysisLevel::Quick => String::new(),
        _ => format!(
            "\n\nArgue the case from three perspectives before concluding:\n- {}\n- {}\n- {}",
            OPTIMISTIC_BRIEF, PESSIMISTIC_BRIEF, RISK_MANAGER_BRIEF
        ),
    };
    format!(
        "You are a professional equity research analyst. Be objective, ground every claim in \
         the data provided and respond with a single JSON object and nothing else.{}",
        panel
    )
}

fn format_quote(quote: &Quote) -> String {
    let mut lines = vec![
        format!("Symbol: {}", quote.symbol),
        format!("Price: {:.2} {}", quote.price, quote.currency.as_deref().unwrap_or("USD")),
        format!("Change: {:+.2} ({:+.2}%)", quote.change, quote.change_percent),
        format!("Day range: {:.2} - {:.2} (open {:.2})", quote.low, quote.high, quote.open),
        format!("Previous close: {:.2}", quote.previous_close),
        format!("Volume: {}", quote.volume),
        format!("Market status: {}", quote.market_status.as_str()),
    ];
    if let Some(cap) = &quote.market_cap_display {
        lines.push(format!("Market cap: {}", cap));
    }
    if let Some(pe) = quote.pe_ratio {
        lines.push(format!("P/E: {:.2}", pe));
    }
    if let Some(y) = quote.dividend_yield {
        lines.push(format!("Dividend yield: {:.2}%", y));
    }
    if let (Some(lo), Some(hi)) = (quote.fifty_two_week_low, quote.fifty_two_week_high) {
        lines.push(format!("52-week range: {:.2} - {:.2}", lo, hi));
    }
    lines.join("\n")
}

fn response_schema(level: AnalysisLevel) -> &'static str {
    match level {
        AnalysisLevel::Quick => {
            r#"{
  "recommendation": "STRONG_BUY | BUY | HOLD | SELL | STRONG_SELL",
  "confidence": 0.0-1.0,
  "reasoning": "2-3 sentences",
  "key_factors": ["single most important factor"],
  "risk_level": "LOW | MEDIUM | HIGH"
}"#
        }
        AnalysisLevel::Standard => {
            r#"{
  "recommendation": "STRONG_BUY | BUY | HOLD | SELL | STRONG_SELL",
  "confidence": 0.0-1.0,
  "target_price": number or null,
  "reasoning": "at most 200 words",
  "key_factors": ["factor1", "factor2", "factor3"],
  "risks": ["risk1", "risk2"],
  "risk_level": "LOW | MEDIUM | HIGH",
  "risk_score": 0-100,
  "time_horizon": "SHORT | MEDIUM | LONG",
  "agents": {
    "optimistic": {"recommendation": "...", "confidence": 0.0-1.0, "target_price": number or null, "reasoning": "..."},
    "pessimistic": {"recommendation": "...", "confidence": 0.0-1.0, "target_price": number or null, "reasoning": "..."},
    "risk_manager": {"recommendation": "...", "confidence": 0.0-1.0, "reasoning": "..."}
  }
}"#
        }
        AnalysisLevel::Comprehensive => {
            r#"{
  "recommendation": "STRONG_BUY | BUY | HOLD | SELL | STRONG_SELL",
  "confidence": 0.0-1.0,
  "target_price": number or null,
  "reasoning": "full analysis covering technical and fundamental picture",
  "key_factors": ["factor1", "factor2", "factor3", "factor4"],
  "risks": ["risk1", "risk2", "risk3"],
  "risk_level": "LOW | MEDIUM | HIGH",
  "risk_score": 0-100,
  "time_horizon": "SHORT | MEDIUM | LONG",
  "agents": {
    "optimistic": {"recommendation": "...", "confidence": 0.0-1.0, "target_price": number or null, "reasoning": "growth drivers and catalysts"},
    "pessimistic": {"recommendation": "...", "confidence": 0.0-1.0, "target_price": number or null, "reasoning": "valuation and downside risks"},
    "risk_manager": {"recommendation": "...", "confidence": 0.0-1.0, "reasoning": "volatility, liquidity and position sizing"}
  }
}"#
        }
    }
}

fn tolerance_note(tolerance: RiskTolerance) -> &'static str {
    match tolerance {
        RiskTolerance::Conservative => "conservative: capital preservation first",
        RiskTolerance::Moderate => "moderate: balanced growth and risk",
        RiskTolerance::Aggressive => "aggressive: accepts high volatility for upside",
    }
}

/// Chat request asking for a JSON analysis of one quote.
pub fn build_request(
    quote: &Quote,
    level: AnalysisLevel,
    horizon: TimeHorizon,
    tolerance: RiskTolerance,
) -> ChatRequest {
    let user = format!(
        "Analyze {symbol} for a {horizon} investor with a {tolerance} risk profile.\n\n\
         Market data:\n{data}\n\n\
         Respond in this JSON format:\n{schema}",
        symbol = quote.symbol,
        horizon = horizon.describe(),
        tolerance = tolerance_note(tolerance),
        data = format_quote(quote),
        schema = response_schema(level),
    );

    ChatRequest::new(vec![
        ChatMessage::system(system_prompt(level)),
        ChatMessage::user(user),
    ])
    .with_temperature(ANALYSIS_TEMPERATURE)
    .with_max_tokens(ANALYSIS_MAX_TOKENS)
    .json()
}
