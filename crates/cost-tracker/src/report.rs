use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::budget::{BudgetManager, BudgetStatus};
use crate::models::{CostCategory, CostEntry};
use crate::tracker::CostTracker;

#[derive(Debug, Clone, Serialize)]
pub struct Expense {
    pub description: String,
    pub amount: Decimal,
    pub category: CostCategory,
    pub timestamp: DateTime<Utc>,
}

impl From<&CostEntry> for Expense {
    fn from(entry: &CostEntry) -> Self {
        Self {
            description: entry.description.clone(),
            amount: entry.amount,
            category: entry.category,
            timestamp: entry.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub total_cost: Decimal,
    pub category_breakdown: BTreeMap<CostCategory, Decimal>,
    pub transaction_count: usize,
    pub top_expenses: Vec<Expense>,
    pub budget_status: BTreeMap<String, BudgetStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodSummary {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_cost: Decimal,
    pub daily_breakdown: BTreeMap<NaiveDate, Decimal>,
    pub category_breakdown: BTreeMap<CostCategory, Decimal>,
    pub average_daily_cost: Decimal,
    pub total_transactions: usize,
    pub budget_status: BTreeMap<String, BudgetStatus>,
}

fn by_category(entries: &[CostEntry]) -> BTreeMap<CostCategory, Decimal> {
    let mut totals = BTreeMap::new();
    for entry in entries {
        *totals.entry(entry.category).or_insert(Decimal::ZERO) += entry.amount;
    }
    totals
}

pub struct CostReporter {
    tracker: Arc<CostTracker>,
    budgets: Arc<BudgetManager>,
}

impl CostReporter {
    pub fn new(tracker: Arc<CostTracker>, budgets: Arc<BudgetManager>) -> Self {
        Self { tracker, budgets }
    }

    pub async fn daily_report(&self, date: NaiveDate) -> DailyReport {
        let entries = self.tracker.costs_for_period(date, date, None).await;

        let mut top: Vec<&CostEntry> = entries.iter().collect();
        top.sort_by(|a, b| b.amount.cmp(&a.amount));

        DailyReport {
            date,
            total_cost: entries.iter().map(|e| e.amount).sum(),
            category_breakdown: by_category(&entries),
            transaction_count: entries.len(),
            top_expenses: top.into_iter().take(5).map(Expense::from).collect(),
            budget_status: self.budgets.budget_status_on(date).await,
        }
    }

    /// Summary of the `days` days ending on `end`.
    pub async fn period_summary(&self, end: NaiveDate, days: u32) -> PeriodSummary {
        let days = days.clamp(1, 366);
        let start = end - Duration::days(days as i64 - 1);
        let entries = self.tracker.costs_for_period(start, end, None).await;

        let mut daily_breakdown = BTreeMap::new();
        let mut day = start;
        while day <= end {
            daily_breakdown.insert(day, Decimal::ZERO);
            day += Duration::days(1);
        }
        for entry in &entries {
            if let Some(total) = daily_breakdown.get_mut(&entry.date()) {
                *total += entry.amount;
            }
        }

        let total_cost: Decimal = entries.iter().map(|e| e.amount).sum();
        PeriodSummary {
            start_date: start,
            end_date: end,
            total_cost,
            daily_breakdown,
            category_breakdown: by_category(&entries),
            average_daily_cost: total_cost / Decimal::from(days),
            total_transactions: entries.len(),
            budget_status: self.budgets.budget_status_on(end).await,
        }
    }
}
