use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    AiApi,
    DataApi,
    Infrastructure,
    Storage,
    Bandwidth,
}

impl CostCategory {
    pub const ALL: [CostCategory; 5] = [
        CostCategory::AiApi,
        CostCategory::DataApi,
        CostCategory::Infrastructure,
        CostCategory::Storage,
        CostCategory::Bandwidth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CostCategory::AiApi => "ai_api",
            CostCategory::DataApi => "data_api",
            CostCategory::Infrastructure => "infrastructure",
            CostCategory::Storage => "storage",
            CostCategory::Bandwidth => "bandwidth",
        }
    }
}

impl fmt::Display for CostCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single charge against the running budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEntry {
    pub timestamp: DateTime<Utc>,
    pub category: CostCategory,
    pub amount: Decimal,
    pub description: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl CostEntry {
    pub fn new(category: CostCategory, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            amount,
            description: description.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl BudgetPeriod {
    /// Inclusive first and last day of the period containing `day`. Weeks start on Monday.
    pub fn bounds(&self, day: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            BudgetPeriod::Daily => (day, day),
            BudgetPeriod::Weekly => {
                let start = day - Duration::days(day.weekday().num_days_from_monday() as i64);
                (start, start + Duration::days(6))
            }
            BudgetPeriod::Monthly => {
                let start = day.with_day(1).unwrap_or(day);
                let next_month = if day.month() == 12 {
                    NaiveDate::from_ymd_opt(day.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(day.year(), day.month() + 1, 1)
                };
                let end = next_month.map(|d| d - Duration::days(1)).unwrap_or(day);
                (start, end)
            }
            BudgetPeriod::Yearly => (
                NaiveDate::from_ymd_opt(day.year(), 1, 1).unwrap_or(day),
                NaiveDate::from_ymd_opt(day.year(), 12, 31).unwrap_or(day),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
    Emergency,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_period_bounds() {
        // Thursday
        let day = d(2024, 2, 29);
        assert_eq!(BudgetPeriod::Daily.bounds(day), (day, day));
        assert_eq!(BudgetPeriod::Weekly.bounds(day), (d(2024, 2, 26), d(2024, 3, 3)));
        assert_eq!(BudgetPeriod::Monthly.bounds(day), (d(2024, 2, 1), d(2024, 2, 29)));
        assert_eq!(BudgetPeriod::Yearly.bounds(day), (d(2024, 1, 1), d(2024, 12, 31)));
    }

    #[test]
    fn test_december_and_monday_edges() {
        assert_eq!(
            BudgetPeriod::Monthly.bounds(d(2024, 12, 15)),
            (d(2024, 12, 1), d(2024, 12, 31))
        );
        let monday = d(2024, 3, 4);
        assert_eq!(BudgetPeriod::Weekly.bounds(monday).0, monday);
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&CostCategory::AiApi).unwrap();
        assert_eq!(json, "\"ai_api\"");
    }
}
