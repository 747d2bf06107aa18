use cost_tracker::{token_cost, BudgetManager, CostCategory, CostTracker};
use futures_util::stream::{self, StreamExt};
use research_cache::{AiRequestRecord, AnalysisCache, CacheStore, UsageMonitor};
use research_core::{
    AnalysisLevel, ChatCompletion, ChatModel, ChatRequest, Quote, Recommendation, ResearchError,
    RiskLevel, RiskTolerance, StockAnalysis, SymbolValidator, TimeHorizon, TokenUsage,
    ValidationReport, ValidationStatus,
};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::consensus::{apply_risk_adjustment, compute_consensus};
use crate::fallback::rule_based_analysis;
use crate::parsing::{parse_analysis, ParseOutcome};
use crate::prompts::{build_request, ANALYSIS_MAX_TOKENS};
use crate::quotes::QuoteService;
use crate::validation::{quality_score, validate, Candidate};

const DEFAULT_BATCH_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct AnalysisOptions {
    pub time_horizon: TimeHorizon,
    pub risk_tolerance: RiskTolerance,
    pub level: AnalysisLevel,
    pub force_refresh: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            time_horizon: TimeHorizon::Medium,
            risk_tolerance: RiskTolerance::default(),
            level: AnalysisLevel::default(),
            force_refresh: false,
        }
    }
}

impl AnalysisOptions {
    fn cache_params(&self) -> String {
        format!("{:?}:{:?}", self.time_horizon, self.risk_tolerance)
    }
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BatchAnalysis {
    pub symbol: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<StockAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Turns quotes into recommendations through a single model call.
///
/// The prompt asks the model to argue optimistic, pessimistic and risk
/// perspectives. Their views are combined locally into a consensus, checked
/// against the risk picture and validated before anything is cached. If the
/// model is unreachable a rule-based analysis is returned instead.
pub struct AnalysisEngine {
    model: Arc<dyn ChatModel>,
    quotes: Arc<QuoteService>,
    cache: AnalysisCache,
    usage: Arc<UsageMonitor>,
    costs: Option<Arc<CostTracker>>,
    budgets: Option<Arc<BudgetManager>>,
    batch_concurrency: usize,
}

impl AnalysisEngine {
    pub fn new(
        model: Arc<dyn ChatModel>,
        quotes: Arc<QuoteService>,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            model,
            quotes,
            cache: AnalysisCache::new(store.clone()),
            usage: Arc::new(UsageMonitor::new(store)),
            costs: None,
            budgets: None,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    pub fn with_usage_monitor(mut self, usage: Arc<UsageMonitor>) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_cost_controls(mut self, costs: Arc<CostTracker>, budgets: Arc<BudgetManager>) -> Self {
        self.costs = Some(costs);
        self.budgets = Some(budgets);
        self
    }

    pub fn with_batch_concurrency(mut self, n: usize) -> Self {
        self.batch_concurrency = n.max(1);
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.model()
    }

    pub fn usage(&self) -> &Arc<UsageMonitor> {
        &self.usage
    }

    /// Refuse the call when its worst-case cost would exhaust a budget.
    async fn check_budget(&self, request: &ChatRequest) -> Result<(), ResearchError> {
        let Some(budgets) = &self.budgets else {
            return Ok(());
        };
        let prompt_chars: usize = request.messages.iter().map(|m| m.content.len()).sum();
        let prompt_tokens = (prompt_chars / 4) as u32;
        let max_completion = request.max_tokens.unwrap_or(ANALYSIS_MAX_TOKENS);
        let Some(estimate) = token_cost(self.model.model(), prompt_tokens, max_completion) else {
            return Ok(());
        };

        match budgets.would_exceed(CostCategory::AiApi, estimate).await {
            Some(budget) => {
                tracing::warn!("Refusing AI analysis, {} budget exhausted", budget);
                Err(ResearchError::BudgetExceeded(format!("{} budget reached", budget)))
            }
            None => Ok(()),
        }
    }

    pub async fn analyze(
        &self,
        raw_symbol: &str,
        options: &AnalysisOptions,
    ) -> Result<StockAnalysis, ResearchError> {
        let symbol = self.quotes.validator().validate(raw_symbol)?;
        let cache_key = AnalysisCache::cache_key(&symbol, options.level, &options.cache_params());

        if !options.force_refresh {
            if let Some(cached) = self.cache.get(&cache_key).await {
                tracing::debug!("Analysis cache hit for {}", symbol);
                return Ok(cached);
            }
        }

        let quote = self.quotes.get_quote(&symbol, false).await?;
        let request = build_request(&quote, options.level, options.time_horizon, options.risk_tolerance);
        self.check_budget(&request).await?;

        tracing::info!("Requesting {} analysis for {}", options.level.as_str(), symbol);
        let started = Instant::now();
        let completion = match self.model.complete(request).await {
            Ok(c) => c,
            Err(e) => {
                let elapsed = started.elapsed();
                tracing::warn!("AI analysis for {} failed, using rule-based fallback: {}", symbol, e);
                self.usage
                    .record(AiRequestRecord {
                        symbol: symbol.clone(),
                        level: options.level,
                        latency: elapsed,
                        usage: TokenUsage::default(),
                        cost: 0.0,
                        success: false,
                        quality_score: None,
                        validation: None,
                    })
                    .await;
                let mut fallback =
                    rule_based_analysis(&quote, options.level, options.time_horizon, &e.to_string());
                fallback.processing_time_ms = elapsed.as_millis() as u64;
                return Ok(fallback);
            }
        };
        let elapsed = started.elapsed();

        let mut analysis = assemble(&quote, options, &completion, elapsed);

        let cost = match &self.costs {
            Some(costs) => {
                costs
                    .record_ai_cost(
                        &completion.model,
                        completion.usage.prompt_tokens,
                        completion.usage.completion_tokens,
                        Some(&symbol),
                    )
                    .await
            }
            None => token_cost(
                &completion.model,
                completion.usage.prompt_tokens,
                completion.usage.completion_tokens,
            ),
        };
        analysis.estimated_cost = cost.and_then(|c| c.to_f64()).unwrap_or(0.0);

        self.usage
            .record(AiRequestRecord {
                symbol: symbol.clone(),
                level: options.level,
                latency: elapsed,
                usage: completion.usage,
                cost: analysis.estimated_cost,
                success: true,
                quality_score: Some(analysis.quality_score),
                validation: Some(analysis.validation.status),
            })
            .await;

        if analysis.validation.status == ValidationStatus::Invalid {
            tracing::warn!(
                "Analysis for {} failed validation: {:?}",
                symbol,
                analysis.validation.issues
            );
        } else {
            self.cache.put(&cache_key, &analysis).await;
        }

        Ok(analysis)
    }

    /// Analyze several symbols at one level. Duplicates are collapsed and order is kept.
    pub async fn analyze_batch(&self, symbols: &[String], level: AnalysisLevel) -> Vec<BatchAnalysis> {
        let options = AnalysisOptions {
            level,
            ..AnalysisOptions::default()
        };
        let mut seen = HashSet::new();
        let unique: Vec<String> = symbols
            .iter()
            .map(|s| SymbolValidator::normalize(s))
            .filter(|s| seen.insert(s.clone()))
            .collect();

        let mut results: Vec<(usize, BatchAnalysis)> = stream::iter(unique.into_iter().enumerate())
            .map(|(i, symbol)| async move {
                let outcome = match self.analyze(&symbol, &options).await {
                    Ok(analysis) => BatchAnalysis {
                        symbol,
                        success: true,
                        data: Some(analysis),
                        error: None,
                    },
                    Err(e) => BatchAnalysis {
                        symbol,
                        success: false,
                        data: None,
                        error: Some(e.to_string()),
                    },
                };
                (i, outcome)
            })
            .buffer_unordered(self.batch_concurrency)
            .collect()
            .await;

        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, r)| r).collect()
    }
}

/// Build the final analysis from one model completion.
pub fn assemble(
    quote: &Quote,
    options: &AnalysisOptions,
    completion: &ChatCompletion,
    elapsed: Duration,
) -> StockAnalysis {
    let mut analysis = StockAnalysis {
        symbol: quote.symbol.clone(),
        recommendation: Recommendation::Hold,
        confidence: 0.5,
        target_price: None,
        reasoning: String::new(),
        key_factors: Vec::new(),
        risks: Vec::new(),
        risk_level: RiskLevel::Medium,
        time_horizon: options.time_horizon,
        analysis: BTreeMap::new(),
        consensus: None,
        validation: ValidationReport::valid(),
        quality_score: 0.0,
        analysis_level: options.level,
        usage: Some(completion.usage),
        estimated_cost: 0.0,
        model_used: completion.model.clone(),
        price_at_analysis: quote.price,
        processing_time_ms: elapsed.as_millis() as u64,
        timestamp: chrono::Utc::now(),
        is_cached: false,
        is_fallback: false,
        fallback_reason: None,
        raw_response: None,
    };

    let parsed = match parse_analysis(&completion.content) {
        ParseOutcome::Parsed(p) => p,
        ParseOutcome::Unparseable(raw) => {
            analysis.key_factors = vec!["Analysis parsing failed".to_string()];
            analysis.validation = ValidationReport {
                status: ValidationStatus::Invalid,
                issues: vec!["Critical: Response was not a JSON object".to_string()],
            };
            analysis.raw_response = Some(raw);
            return analysis;
        }
    };

    let mut consensus = compute_consensus(&parsed.agents);
    let (base_rec, base_conf) = consensus
        .as_ref()
        .map(|c| (c.recommendation, c.confidence))
        .unwrap_or((parsed.recommendation, parsed.confidence));
    let adjusted = apply_risk_adjustment(base_rec, base_conf, parsed.risk_level, parsed.risk_score);
    if let Some(c) = consensus.as_mut() {
        c.risk_adjustment = adjusted.note.clone();
    } else if let Some(note) = &adjusted.note {
        tracing::info!("{}: {}", quote.symbol, note);
    }

    let validation = validate(&Candidate {
        recommendation: adjusted.recommendation,
        confidence: adjusted.confidence,
        raw_confidence: parsed.raw_confidence,
        reasoning: &parsed.reasoning,
        missing: &parsed.missing,
        unrecognized_recommendation: parsed.unrecognized_recommendation.as_deref(),
        change_percent: quote.change_percent,
    });

    analysis.recommendation = adjusted.recommendation;
    analysis.confidence = adjusted.confidence;
    analysis.target_price = parsed
        .target_price
        .or_else(|| consensus.as_ref().and_then(|c| c.average_target_price));
    analysis.reasoning = parsed.reasoning;
    analysis.key_factors = parsed.key_factors;
    analysis.risks = parsed.risks;
    analysis.risk_level = parsed.risk_level;
    analysis.time_horizon = parsed.time_horizon.unwrap_or(options.time_horizon);
    analysis.analysis = parsed.agents;
    analysis.consensus = consensus;
    analysis.quality_score =
        quality_score(validation.status, adjusted.confidence, elapsed.as_secs_f64());
    analysis.validation = validation;
    analysis
}
