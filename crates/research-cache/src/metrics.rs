use chrono::{NaiveDate, Utc};
use research_core::{AnalysisLevel, TokenUsage, ValidationStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::CacheStore;

const METRICS_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

const ERROR_RATE_ALERT: f64 = 0.05;
const LATENCY_ALERT_MS: f64 = 30_000.0;
const DAILY_COST_ALERT: f64 = 50.0;

/// One finished AI request, successful or not.
#[derive(Debug, Clone)]
pub struct AiRequestRecord {
    pub symbol: String,
    pub level: AnalysisLevel,
    pub latency: Duration,
    pub usage: TokenUsage,
    pub cost: f64,
    pub success: bool,
    pub quality_score: Option<f64>,
    pub validation: Option<ValidationStatus>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub average_latency_ms: f64,
    pub average_quality_score: f64,
    pub error_rate: f64,
    pub requests_by_level: HashMap<String, u64>,
    pub validation_failures: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub requests: u64,
    pub failures: u64,
    pub tokens: u64,
    pub cost: f64,
    pub average_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageAlert {
    pub kind: &'static str,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Default)]
struct Totals {
    snapshot: UsageSnapshot,
    quality_sum: f64,
    quality_count: u64,
}

/// Running AI usage counters, mirrored into a per-day hash in the cache store.
pub struct UsageMonitor {
    store: Arc<dyn CacheStore>,
    totals: RwLock<Totals>,
}

fn daily_key(date: NaiveDate) -> String {
    format!("ai_metrics:{}", date.format("%Y-%m-%d"))
}

impl UsageMonitor {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            totals: RwLock::new(Totals::default()),
        }
    }

    pub async fn record(&self, record: AiRequestRecord) {
        let latency_ms = record.latency.as_secs_f64() * 1000.0;
        {
            let mut totals = self.totals.write().await;
            let s = &mut totals.snapshot;
            s.total_requests += 1;
            if record.success {
                s.successful_requests += 1;
            } else {
                s.failed_requests += 1;
            }
            s.total_tokens += record.usage.total_tokens as u64;
            s.total_cost += record.cost;
            s.average_latency_ms +=
                (latency_ms - s.average_latency_ms) / s.total_requests as f64;
            s.error_rate = s.failed_requests as f64 / s.total_requests as f64;
            *s.requests_by_level
                .entry(record.level.as_str().to_string())
                .or_insert(0) += 1;
            if matches!(
                record.validation,
                Some(ValidationStatus::Invalid | ValidationStatus::RequiresHumanReview)
            ) {
                s.validation_failures += 1;
            }
            if let Some(q) = record.quality_score {
                totals.quality_sum += q;
                totals.quality_count += 1;
                totals.snapshot.average_quality_score =
                    totals.quality_sum / totals.quality_count as f64;
            }
        }

        let key = daily_key(Utc::now().date_naive());
        let fields = [
            ("requests", 1.0),
            ("failures", if record.success { 0.0 } else { 1.0 }),
            ("tokens", record.usage.total_tokens as f64),
            ("cost", record.cost),
            ("latency_ms_total", latency_ms),
        ];
        if let Err(e) = self.store.hash_incr(&key, &fields, METRICS_TTL).await {
            tracing::warn!("Failed to persist daily AI metrics: {}", e);
        }

        tracing::debug!(
            symbol = %record.symbol,
            level = record.level.as_str(),
            latency_ms = latency_ms as u64,
            tokens = record.usage.total_tokens,
            success = record.success,
            "AI request recorded"
        );
    }

    pub async fn snapshot(&self) -> UsageSnapshot {
        self.totals.read().await.snapshot.clone()
    }

    pub async fn daily_summary(&self, date: NaiveDate) -> DailyUsage {
        let fields = match self.store.hash_get_all(&daily_key(date)).await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Failed to read AI metrics for {}: {}", date, e);
                HashMap::new()
            }
        };
        let num = |name: &str| {
            fields
                .get(name)
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0)
        };

        let requests = num("requests") as u64;
        DailyUsage {
            date,
            requests,
            failures: num("failures") as u64,
            tokens: num("tokens") as u64,
            cost: num("cost"),
            average_latency_ms: if requests > 0 {
                num("latency_ms_total") / requests as f64
            } else {
                0.0
            },
        }
    }

    /// Threshold breaches over the running totals and today's spend.
    pub async fn alerts(&self) -> Vec<UsageAlert> {
        let snapshot = self.snapshot().await;
        let today = self.daily_summary(Utc::now().date_naive()).await;
        let mut alerts = Vec::new();

        if snapshot.total_requests > 0 && snapshot.error_rate > ERROR_RATE_ALERT {
            alerts.push(UsageAlert {
                kind: "high_error_rate",
                message: format!("AI error rate at {:.1}%", snapshot.error_rate * 100.0),
                value: snapshot.error_rate,
                threshold: ERROR_RATE_ALERT,
            });
        }
        if snapshot.average_latency_ms > LATENCY_ALERT_MS {
            alerts.push(UsageAlert {
                kind: "high_latency",
                message: format!(
                    "Average AI latency at {:.1}s",
                    snapshot.average_latency_ms / 1000.0
                ),
                value: snapshot.average_latency_ms,
                threshold: LATENCY_ALERT_MS,
            });
        }
        if today.cost > DAILY_COST_ALERT {
            alerts.push(UsageAlert {
                kind: "high_daily_cost",
                message: format!("AI spend today at ${:.2}", today.cost),
                value: today.cost,
                threshold: DAILY_COST_ALERT,
            });
        }
        alerts
    }
}
