use crate::db::{ResearchDb, Result};
use crate::models::QuoteSnapshot;
use chrono::{Duration, Utc};
use research_core::{DataSource, Quote};

/// Append-only log of quotes served to clients.
pub struct QuoteHistory {
    db: ResearchDb,
}

impl QuoteHistory {
    pub fn new(db: ResearchDb) -> Self {
        Self { db }
    }

    pub async fn record(&self, quote: &Quote) -> Result<i64> {
        let source = match quote.source {
            DataSource::YahooFinance => "yahoo_finance",
            DataSource::Cached => "cached",
            DataSource::StaleCache => "stale_cache",
        };
        let result = sqlx::query(
            r#"
            INSERT INTO quote_snapshots
                (symbol, price, change, change_percent, volume, market_status, source, quoted_at, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&quote.symbol)
        .bind(quote.price)
        .bind(quote.change)
        .bind(quote.change_percent)
        .bind(i64::try_from(quote.volume).unwrap_or(i64::MAX))
        .bind(quote.market_status.as_str())
        .bind(source)
        .bind(quote.timestamp)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent snapshots for a symbol, newest first.
    pub async fn latest(&self, symbol: &str, limit: i64) -> Result<Vec<QuoteSnapshot>> {
        let snapshots = sqlx::query_as::<_, QuoteSnapshot>(
            "SELECT * FROM quote_snapshots WHERE symbol = ? ORDER BY recorded_at DESC, id DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(snapshots)
    }

    /// Delete snapshots older than `days`, returning how many went.
    pub async fn prune(&self, days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days);
        let result = sqlx::query("DELETE FROM quote_snapshots WHERE recorded_at < ?")
            .bind(cutoff)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use research_core::MarketStatus;

    pub(crate) fn quote(symbol: &str, price: f64, change: f64) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            price,
            change,
            change_percent: change / (price - change) * 100.0,
            volume: 52_000_000,
            open: price - change,
            high: price + 1.0,
            low: price - 2.0,
            previous_close: price - change,
            market_cap: None,
            market_cap_display: None,
            pe_ratio: None,
            dividend_yield: None,
            fifty_two_week_high: None,
            fifty_two_week_low: None,
            currency: Some("USD".to_string()),
            exchange: None,
            timestamp: Utc::now(),
            source: DataSource::YahooFinance,
            market_status: MarketStatus::Open,
            is_cached: false,
            cache_age_seconds: None,
        }
    }

    #[tokio::test]
    async fn test_record_and_latest() {
        let history = QuoteHistory::new(ResearchDb::new("sqlite::memory:").await.unwrap());

        history.record(&quote("AAPL", 190.0, 1.5)).await.unwrap();
        history.record(&quote("AAPL", 191.0, 2.5)).await.unwrap();
        history.record(&quote("MSFT", 410.0, -3.0)).await.unwrap();

        let latest = history.latest("AAPL", 10).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].price, 191.0);
        assert_eq!(latest[0].market_status, "open");
        assert_eq!(latest[0].source, "yahoo_finance");

        assert_eq!(history.latest("AAPL", 1).await.unwrap().len(), 1);
        assert!(history.latest("TSLA", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_keeps_recent_rows() {
        let history = QuoteHistory::new(ResearchDb::new("sqlite::memory:").await.unwrap());
        history.record(&quote("AAPL", 190.0, 1.5)).await.unwrap();

        assert_eq!(history.prune(30).await.unwrap(), 0);
        assert_eq!(history.latest("AAPL", 5).await.unwrap().len(), 1);
    }
}
