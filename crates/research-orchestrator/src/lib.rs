//! Quote lookups and AI stock analysis built on the provider, model and cache crates.

pub mod consensus;
pub mod engine;
pub mod fallback;
pub mod parsing;
pub mod prompts;
pub mod quotes;
pub mod validation;

pub use consensus::{apply_risk_adjustment, compute_consensus, RiskAdjusted};
pub use engine::{AnalysisEngine, AnalysisOptions, BatchAnalysis};
pub use fallback::{rule_based_analysis, rule_based_recommendation};
pub use parsing::{parse_analysis, ParseOutcome, ParsedAnalysis};
pub use quotes::{BatchQuote, QuoteService};
pub use validation::{quality_score, validate};
