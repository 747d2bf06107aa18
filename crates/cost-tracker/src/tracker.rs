use chrono::{Duration as ChronoDuration, NaiveDate};
use research_cache::CacheStore;
use rust_decimal::prelude::*;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::models::{CostCategory, CostEntry};
use crate::pricing;

const RETENTION: Duration = Duration::from_secs(90 * 24 * 3600);
const MAX_LOCAL_ENTRIES: usize = 1000;
const MAX_ENTRIES_PER_DAY: usize = 100_000;

fn day_key(date: NaiveDate) -> String {
    format!("costs:{}", date.format("%Y-%m-%d"))
}

fn total_key(date: NaiveDate, category: CostCategory) -> String {
    format!("cost_totals:{}:{}", date.format("%Y-%m-%d"), category)
}

/// Records every cost the service incurs.
///
/// Entries are appended to a per-day list in the cache store with running
/// per-category totals, and the most recent ones are also kept in memory so
/// reads still work when the store is unreachable.
pub struct CostTracker {
    store: Arc<dyn CacheStore>,
    local: RwLock<VecDeque<CostEntry>>,
}

impl CostTracker {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            local: RwLock::new(VecDeque::with_capacity(MAX_LOCAL_ENTRIES)),
        }
    }

    /// Charge a completion by its token counts. Unknown models are logged and skipped.
    pub async fn record_ai_cost(
        &self,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        symbol: Option<&str>,
    ) -> Option<Decimal> {
        let Some(amount) = pricing::token_cost(model, input_tokens, output_tokens) else {
            tracing::warn!("Unknown model for cost calculation: {}", model);
            return None;
        };

        let mut entry = CostEntry::new(
            CostCategory::AiApi,
            amount,
            format!("{} API call: {}+{} tokens", model, input_tokens, output_tokens),
        )
        .with_meta("model", model)
        .with_meta("input_tokens", input_tokens)
        .with_meta("output_tokens", output_tokens);
        if let Some(symbol) = symbol {
            entry = entry.with_meta("symbol", symbol);
        }

        self.record_entry(entry).await;
        Some(amount)
    }

    /// Charge data-provider requests. Free providers record nothing.
    pub async fn record_data_api(&self, provider: &str, requests: u32) {
        let rate = pricing::data_request_rate(provider);
        let amount = rate * Decimal::from(requests);
        if amount <= Decimal::ZERO {
            return;
        }
        let entry = CostEntry::new(
            CostCategory::DataApi,
            amount,
            format!("{} API: {} requests", provider, requests),
        )
        .with_meta("provider", provider)
        .with_meta("requests", requests);
        self.record_entry(entry).await;
    }

    pub async fn record_infrastructure(&self, service: &str, amount: Decimal, description: &str) {
        let entry = CostEntry::new(
            CostCategory::Infrastructure,
            amount,
            format!("{}: {}", service, description),
        )
        .with_meta("service", service);
        self.record_entry(entry).await;
    }

    pub async fn record_entry(&self, entry: CostEntry) {
        if let Err(e) = self.persist(&entry).await {
            tracing::error!("Failed to store cost entry: {}", e);
        }

        let mut local = self.local.write().await;
        if local.len() >= MAX_LOCAL_ENTRIES {
            local.pop_front();
        }
        local.push_back(entry);
    }

    async fn persist(&self, entry: &CostEntry) -> Result<(), String> {
        let payload = serde_json::to_string(entry).map_err(|e| e.to_string())?;
        let date = entry.date();
        self.store
            .push_list(&day_key(date), &payload, RETENTION)
            .await
            .map_err(|e| e.to_string())?;
        self.store
            .incr_float(
                &total_key(date, entry.category),
                entry.amount.to_f64().unwrap_or(0.0),
                RETENTION,
            )
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn stored_entries(&self, start: NaiveDate, end: NaiveDate) -> Vec<CostEntry> {
        let mut entries = Vec::new();
        let mut day = start;
        while day <= end {
            match self.store.list_range(&day_key(day), MAX_ENTRIES_PER_DAY).await {
                Ok(items) => entries.extend(items.iter().filter_map(|raw| {
                    serde_json::from_str::<CostEntry>(raw)
                        .map_err(|e| tracing::warn!("Skipping malformed cost entry: {}", e))
                        .ok()
                })),
                Err(e) => {
                    tracing::error!("Failed to retrieve costs for {}: {}", day, e);
                    return Vec::new();
                }
            }
            day += ChronoDuration::days(1);
        }
        entries
    }

    /// Entries between two dates inclusive, oldest first.
    pub async fn costs_for_period(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        category: Option<CostCategory>,
    ) -> Vec<CostEntry> {
        let mut entries = self.stored_entries(start, end).await;
        if entries.is_empty() {
            entries = self
                .local
                .read()
                .await
                .iter()
                .filter(|e| (start..=end).contains(&e.date()))
                .cloned()
                .collect();
        }

        entries.retain(|e| category.map_or(true, |c| e.category == c));
        entries.sort_by_key(|e| e.timestamp);
        entries
    }

    pub async fn total_for_period(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        category: Option<CostCategory>,
    ) -> Decimal {
        self.costs_for_period(start, end, category)
            .await
            .iter()
            .map(|e| e.amount)
            .sum()
    }

    /// Running total for one category and day, read from the store counters.
    pub async fn daily_total(&self, date: NaiveDate, category: CostCategory) -> Decimal {
        match self.store.get(&total_key(date, category)).await {
            Ok(Some(raw)) => Decimal::from_str(&raw)
                .or_else(|_| Decimal::from_scientific(&raw))
                .unwrap_or_default(),
            Ok(None) => Decimal::ZERO,
            Err(e) => {
                tracing::warn!("Failed to read cost total: {}", e);
                Decimal::ZERO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use research_cache::MemoryStore;
    use rust_decimal_macros::dec;

    fn tracker() -> CostTracker {
        CostTracker::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_record_ai_cost() {
        let tracker = tracker();
        let cost = tracker
            .record_ai_cost("gpt-4o-mini", 2000, 1000, Some("AAPL"))
            .await
            .unwrap();
        assert_eq!(cost, dec!(0.0009));

        let today = Utc::now().date_naive();
        let entries = tracker
            .costs_for_period(today, today, Some(CostCategory::AiApi))
            .await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metadata["symbol"], "AAPL");
        assert_eq!(tracker.daily_total(today, CostCategory::AiApi).await, dec!(0.0009));
    }

    #[tokio::test]
    async fn test_unknown_model_and_free_provider_record_nothing() {
        let tracker = tracker();
        assert!(tracker.record_ai_cost("mystery", 10, 10, None).await.is_none());
        tracker.record_data_api("yahoo_finance", 50).await;

        let today = Utc::now().date_naive();
        assert!(tracker.costs_for_period(today, today, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_period_filters_by_date_and_category() {
        let tracker = tracker();
        let jan = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2024, 2, 10, 12, 0, 0).unwrap();
        tracker
            .record_entry(CostEntry::new(CostCategory::AiApi, dec!(1.5), "jan ai").at(jan))
            .await;
        tracker
            .record_entry(CostEntry::new(CostCategory::Storage, dec!(2), "jan disk").at(jan))
            .await;
        tracker
            .record_entry(CostEntry::new(CostCategory::AiApi, dec!(4), "feb ai").at(feb))
            .await;

        let jan_start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let jan_end = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(tracker.total_for_period(jan_start, jan_end, None).await, dec!(3.5));
        assert_eq!(
            tracker
                .total_for_period(jan_start, jan_end, Some(CostCategory::AiApi))
                .await,
            dec!(1.5)
        );
    }
}
