use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{AlertLevel, BudgetPeriod, CostCategory};
use crate::tracker::CostTracker;

#[derive(Debug, Clone, Serialize)]
pub struct BudgetLimit {
    /// `None` covers every category
    pub category: Option<CostCategory>,
    pub period: BudgetPeriod,
    pub limit: Decimal,
    /// Usage fractions, sorted from most to least severe
    pub thresholds: Vec<(AlertLevel, f64)>,
    pub enabled: bool,
}

impl BudgetLimit {
    pub fn new(category: Option<CostCategory>, period: BudgetPeriod, limit: Decimal) -> Self {
        Self {
            category,
            period,
            limit,
            thresholds: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_thresholds(mut self, warning: f64, critical: f64, emergency: f64) -> Self {
        self.thresholds = vec![
            (AlertLevel::Emergency, emergency),
            (AlertLevel::Critical, critical),
            (AlertLevel::Warning, warning),
        ];
        self
    }

    fn covers(&self, category: CostCategory) -> bool {
        self.category.map_or(true, |c| c == category)
    }

    fn usage(&self, spent: Decimal) -> f64 {
        if self.limit > Decimal::ZERO {
            (spent / self.limit).to_f64().unwrap_or(0.0)
        } else {
            0.0
        }
    }

    fn emergency_threshold(&self) -> f64 {
        self.thresholds
            .iter()
            .find(|(level, _)| *level == AlertLevel::Emergency)
            .map(|(_, t)| *t)
            .unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetAlert {
    pub budget_name: String,
    pub alert_level: AlertLevel,
    pub category: String,
    pub period: BudgetPeriod,
    pub current_cost: Decimal,
    pub budget_limit: Decimal,
    pub usage_percentage: f64,
    pub threshold: f64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub category: String,
    pub period: BudgetPeriod,
    pub current_cost: Decimal,
    pub budget_limit: Decimal,
    pub remaining_budget: Decimal,
    pub usage_percentage: f64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub enabled: bool,
}

fn category_label(category: Option<CostCategory>) -> String {
    category.map_or_else(|| "all".to_string(), |c| c.as_str().to_string())
}

/// Named spending limits evaluated against the tracker's entries.
pub struct BudgetManager {
    tracker: Arc<CostTracker>,
    limits: RwLock<BTreeMap<String, BudgetLimit>>,
}

impl BudgetManager {
    /// `ai_daily` $10 and `total_monthly` $200.
    pub fn new(tracker: Arc<CostTracker>) -> Self {
        Self::with_limits(tracker, dec!(10.00), dec!(200.00))
    }

    pub fn with_limits(tracker: Arc<CostTracker>, ai_daily: Decimal, monthly: Decimal) -> Self {
        let mut limits = BTreeMap::new();
        limits.insert(
            "ai_daily".to_string(),
            BudgetLimit::new(Some(CostCategory::AiApi), BudgetPeriod::Daily, ai_daily)
                .with_thresholds(0.7, 0.9, 1.0),
        );
        limits.insert(
            "total_monthly".to_string(),
            BudgetLimit::new(None, BudgetPeriod::Monthly, monthly).with_thresholds(0.6, 0.8, 0.95),
        );
        Self {
            tracker,
            limits: RwLock::new(limits),
        }
    }

    pub async fn set_limit(&self, name: &str, limit: BudgetLimit) {
        self.limits.write().await.insert(name.to_string(), limit);
    }

    async fn spent(&self, limit: &BudgetLimit, today: NaiveDate) -> (Decimal, NaiveDate, NaiveDate) {
        let (start, end) = limit.period.bounds(today);
        let spent = self
            .tracker
            .total_for_period(start, end, limit.category)
            .await;
        (spent, start, end)
    }

    pub async fn check_budgets(&self) -> Vec<BudgetAlert> {
        self.check_budgets_on(Utc::now().date_naive()).await
    }

    /// Highest crossed threshold per enabled budget.
    pub async fn check_budgets_on(&self, today: NaiveDate) -> Vec<BudgetAlert> {
        let limits = self.limits.read().await.clone();
        let mut alerts = Vec::new();

        for (name, limit) in limits.iter().filter(|(_, l)| l.enabled) {
            let (spent, start, end) = self.spent(limit, today).await;
            let usage = limit.usage(spent);

            let Some((level, threshold)) = limit.thresholds.iter().find(|(_, t)| usage >= *t) else {
                continue;
            };

            tracing::warn!(
                budget = %name,
                level = ?level,
                usage_pct = usage * 100.0,
                "Budget threshold crossed"
            );
            alerts.push(BudgetAlert {
                budget_name: name.clone(),
                alert_level: *level,
                category: category_label(limit.category),
                period: limit.period,
                current_cost: spent,
                budget_limit: limit.limit,
                usage_percentage: usage,
                threshold: *threshold,
                period_start: start,
                period_end: end,
            });
        }
        alerts
    }

    pub async fn budget_status(&self) -> BTreeMap<String, BudgetStatus> {
        self.budget_status_on(Utc::now().date_naive()).await
    }

    pub async fn budget_status_on(&self, today: NaiveDate) -> BTreeMap<String, BudgetStatus> {
        let limits = self.limits.read().await.clone();
        let mut status = BTreeMap::new();
        for (name, limit) in &limits {
            let (spent, start, end) = self.spent(limit, today).await;
            status.insert(
                name.clone(),
                BudgetStatus {
                    category: category_label(limit.category),
                    period: limit.period,
                    current_cost: spent,
                    budget_limit: limit.limit,
                    remaining_budget: limit.limit - spent,
                    usage_percentage: limit.usage(spent),
                    period_start: start,
                    period_end: end,
                    enabled: limit.enabled,
                },
            );
        }
        status
    }

    /// Name of the first budget an extra charge would push past its emergency threshold.
    pub async fn would_exceed(&self, category: CostCategory, amount: Decimal) -> Option<String> {
        self.would_exceed_on(category, amount, Utc::now().date_naive()).await
    }

    pub async fn would_exceed_on(
        &self,
        category: CostCategory,
        amount: Decimal,
        today: NaiveDate,
    ) -> Option<String> {
        let limits = self.limits.read().await.clone();
        for (name, limit) in limits.iter().filter(|(_, l)| l.enabled && l.covers(category)) {
            let (spent, _, _) = self.spent(limit, today).await;
            if limit.usage(spent + amount) >= limit.emergency_threshold() {
                return Some(name.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CostEntry;
    use chrono::TimeZone;
    use research_cache::MemoryStore;

    async fn setup(entries: Vec<CostEntry>) -> BudgetManager {
        let tracker = Arc::new(CostTracker::new(Arc::new(MemoryStore::new())));
        for entry in entries {
            tracker.record_entry(entry).await;
        }
        BudgetManager::new(tracker)
    }

    fn on(day: u32, category: CostCategory, amount: Decimal) -> CostEntry {
        CostEntry::new(category, amount, "test")
            .at(Utc.with_ymd_and_hms(2024, 3, day, 15, 0, 0).unwrap())
    }

    fn march(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[tokio::test]
    async fn test_highest_alert_per_budget() {
        let manager = setup(vec![on(12, CostCategory::AiApi, dec!(9.50))]).await;
        let alerts = manager.check_budgets_on(march(12)).await;

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].budget_name, "ai_daily");
        assert_eq!(alerts[0].alert_level, AlertLevel::Critical);
        assert_eq!(alerts[0].threshold, 0.9);
    }

    #[tokio::test]
    async fn test_daily_budget_resets_next_day() {
        let manager = setup(vec![on(12, CostCategory::AiApi, dec!(9.50))]).await;
        assert!(manager.check_budgets_on(march(13)).await.is_empty());
    }

    #[tokio::test]
    async fn test_monthly_budget_spans_categories() {
        let manager = setup(vec![
            on(1, CostCategory::Infrastructure, dec!(100)),
            on(20, CostCategory::Storage, dec!(25)),
        ])
        .await;
        let alerts = manager.check_budgets_on(march(25)).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].budget_name, "total_monthly");
        assert_eq!(alerts[0].alert_level, AlertLevel::Warning);

        let status = manager.budget_status_on(march(25)).await;
        assert_eq!(status["total_monthly"].remaining_budget, dec!(75));
        assert_eq!(status["ai_daily"].current_cost, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_would_exceed_at_emergency_threshold() {
        let manager = setup(vec![on(12, CostCategory::AiApi, dec!(9.99))]).await;
        assert_eq!(
            manager
                .would_exceed_on(CostCategory::AiApi, dec!(0.01), march(12))
                .await
                .as_deref(),
            Some("ai_daily")
        );
        assert!(manager
            .would_exceed_on(CostCategory::AiApi, dec!(0.001), march(12))
            .await
            .is_none());
        // Other categories only count against the monthly budget
        assert!(manager
            .would_exceed_on(CostCategory::DataApi, dec!(5), march(12))
            .await
            .is_none());
    }
}
