use research_core::{Direction, Recommendation, ValidationReport, ValidationStatus};

const MIN_REASONING_LEN: usize = 50;
const MAX_REASONING_LEN: usize = 1000;
const MIN_CONFIDENCE: f64 = 0.1;

const GENERIC_PHRASES: [&str; 4] = [
    "based on the analysis",
    "considering the factors",
    "after careful review",
    "taking into account",
];
const POSITIVE_WORDS: [&str; 6] = ["growth", "increase", "strong", "positive", "bullish", "upward"];
const NEGATIVE_WORDS: [&str; 6] = ["decline", "decrease", "weak", "negative", "bearish", "downward"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Severity {
    Warning,
    Review,
    Critical,
}

/// What the validator looks at in one analysis.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub raw_confidence: Option<f64>,
    pub reasoning: &'a str,
    pub missing: &'a [&'static str],
    pub unrecognized_recommendation: Option<&'a str>,
    /// Day change of the underlying quote, percent
    pub change_percent: f64,
}

#[derive(Default)]
struct Findings(Vec<(Severity, String)>);

impl Findings {
    fn add(&mut self, severity: Severity, message: impl Into<String>) {
        self.0.push((severity, message.into()));
    }
}

fn check_structure(c: &Candidate, out: &mut Findings) {
    for field in c.missing {
        out.add(Severity::Critical, format!("Missing required field '{}'", field));
    }
    if let Some(raw) = c.raw_confidence {
        if !(0.0..=1.0).contains(&raw) {
            out.add(Severity::Warning, format!("Confidence {} outside valid range", raw));
        }
    }
    if let Some(rec) = c.unrecognized_recommendation {
        out.add(Severity::Warning, format!("Unusual recommendation '{}'", rec));
    }
}

fn check_content(c: &Candidate, out: &mut Findings) {
    let len = c.reasoning.chars().count();
    if len > 0 && len < MIN_REASONING_LEN {
        out.add(Severity::Warning, "Reasoning too brief, may lack depth");
    } else if len > MAX_REASONING_LEN {
        out.add(Severity::Warning, "Reasoning too verbose");
    }

    let lower = c.reasoning.to_lowercase();
    if GENERIC_PHRASES.iter().any(|p| lower.contains(p)) {
        out.add(Severity::Warning, "Response may be too generic");
    }

    if c.confidence < MIN_CONFIDENCE {
        out.add(Severity::Critical, "Confidence too low for reliable analysis");
    }
}

fn check_consistency(c: &Candidate, out: &mut Findings) {
    let direction = c.recommendation.direction();
    if direction == Direction::Buy && c.change_percent < -10.0 && c.confidence > 0.7 {
        out.add(
            Severity::Review,
            "High confidence BUY recommendation despite significant price drop",
        );
    }
    if direction == Direction::Sell && c.change_percent > 10.0 && c.confidence > 0.7 {
        out.add(
            Severity::Review,
            "High confidence SELL recommendation despite significant price gain",
        );
    }
    if c.recommendation == Recommendation::Hold && c.confidence > 0.9 {
        out.add(Severity::Warning, "Very high confidence for HOLD recommendation");
    }
}

fn check_logic(c: &Candidate, out: &mut Findings) {
    let lower = c.reasoning.to_lowercase();
    let positives = POSITIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();
    let negatives = NEGATIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();

    match c.recommendation.direction() {
        Direction::Buy if negatives > positives => out.add(
            Severity::Warning,
            "BUY recommendation but reasoning contains more negative indicators",
        ),
        Direction::Sell if positives > negatives => out.add(
            Severity::Warning,
            "SELL recommendation but reasoning contains more positive indicators",
        ),
        _ => {}
    }
}

/// Structure, content, market consistency and internal logic checks.
pub fn validate(candidate: &Candidate) -> ValidationReport {
    let mut findings = Findings::default();
    check_structure(candidate, &mut findings);
    check_content(candidate, &mut findings);
    check_consistency(candidate, &mut findings);
    check_logic(candidate, &mut findings);

    let status = match findings.0.iter().map(|(s, _)| *s).max() {
        None => ValidationStatus::Valid,
        Some(Severity::Critical) => ValidationStatus::Invalid,
        Some(Severity::Review) => ValidationStatus::RequiresHumanReview,
        Some(Severity::Warning) => ValidationStatus::Warning,
    };

    ValidationReport {
        status,
        issues: findings
            .0
            .into_iter()
            .map(|(severity, msg)| match severity {
                Severity::Critical => format!("Critical: {}", msg),
                Severity::Review => format!("Review: {}", msg),
                Severity::Warning => format!("Warning: {}", msg),
            })
            .collect(),
    }
}

/// Score in 0..1 from the verdict, the confidence and the response time.
///
/// Confidence scales the verdict by 0.5..1, and responses slower than a
/// minute are penalised down to half.
pub fn quality_score(status: ValidationStatus, confidence: f64, response_secs: f64) -> f64 {
    let base = match status {
        ValidationStatus::Valid => 1.0,
        ValidationStatus::Warning => 0.7,
        ValidationStatus::RequiresHumanReview => 0.5,
        ValidationStatus::Invalid => 0.0,
    };
    let confidence_factor = 0.5 + confidence.clamp(0.0, 1.0) * 0.5;
    let time_factor = (1.0 - response_secs / 60.0).max(0.5);
    base * confidence_factor * time_factor
}
