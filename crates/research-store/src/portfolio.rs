use crate::db::{ResearchDb, Result, StoreError};
use crate::models::*;
use chrono::Utc;
use research_core::Quote;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::collections::HashMap;

/// Smallest share count kept after a partial sale.
const MIN_SHARES: Decimal = dec!(0.0001);

fn percent(part: Decimal, whole: Decimal) -> f64 {
    if whole > Decimal::ZERO {
        ((part / whole) * Decimal::ONE_HUNDRED)
            .round_dp(4)
            .to_f64()
            .unwrap_or(0.0)
    } else {
        0.0
    }
}

fn price(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value).filter(|p| *p > Decimal::ZERO)
}

pub struct PortfolioManager {
    db: ResearchDb,
}

impl PortfolioManager {
    pub fn new(db: ResearchDb) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &ResearchDb {
        &self.db
    }

    /// Buy into a position. An existing holding is merged at the weighted average cost.
    pub async fn add_position(&self, input: PositionInput) -> Result<Position> {
        let symbol = input.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(StoreError::InvalidInput("symbol is required".to_string()));
        }
        if input.shares <= Decimal::ZERO {
            return Err(StoreError::InvalidInput("shares must be positive".to_string()));
        }
        if input.price <= Decimal::ZERO {
            return Err(StoreError::InvalidInput("price must be positive".to_string()));
        }

        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let existing = sqlx::query_as::<_, PositionRow>("SELECT * FROM positions WHERE symbol = ?")
            .bind(&symbol)
            .fetch_optional(&mut *tx)
            .await?
            .map(Position::try_from)
            .transpose()?;

        let (shares, average_cost) = match &existing {
            Some(pos) => {
                let shares = pos.shares + input.shares;
                let cost = pos.shares * pos.average_cost + input.shares * input.price;
                (shares, (cost / shares).round_dp(6))
            }
            None => (input.shares, input.price),
        };

        sqlx::query(
            r#"
            INSERT INTO positions (symbol, shares, average_cost, notes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                shares = excluded.shares,
                average_cost = excluded.average_cost,
                notes = COALESCE(excluded.notes, positions.notes),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&symbol)
        .bind(shares.to_string())
        .bind(average_cost.to_string())
        .bind(&input.notes)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Position {} now {} shares at average cost {}",
            symbol,
            shares,
            average_cost
        );

        self.get_position(&symbol)
            .await?
            .ok_or_else(|| StoreError::NotFound(symbol))
    }

    pub async fn get_position(&self, symbol: &str) -> Result<Option<Position>> {
        sqlx::query_as::<_, PositionRow>("SELECT * FROM positions WHERE symbol = ?")
            .bind(symbol.trim().to_uppercase())
            .fetch_optional(self.db.pool())
            .await?
            .map(Position::try_from)
            .transpose()
    }

    pub async fn get_all_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, PositionRow>("SELECT * FROM positions ORDER BY symbol")
            .fetch_all(self.db.pool())
            .await?;

        rows.into_iter().map(Position::try_from).collect()
    }

    /// Sell part of a position, deleting it once nothing meaningful is left.
    pub async fn remove_shares(&self, symbol: &str, shares: Decimal) -> Result<Option<Position>> {
        let position = self
            .get_position(symbol)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("position {}", symbol)))?;

        let remaining = position.shares - shares;
        if remaining < MIN_SHARES {
            self.delete_position(&position.symbol).await?;
            return Ok(None);
        }

        sqlx::query("UPDATE positions SET shares = ?, updated_at = ? WHERE symbol = ?")
            .bind(remaining.to_string())
            .bind(Utc::now())
            .bind(&position.symbol)
            .execute(self.db.pool())
            .await?;

        self.get_position(&position.symbol).await
    }

    pub async fn delete_position(&self, symbol: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM positions WHERE symbol = ?")
            .bind(symbol.trim().to_uppercase())
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("position {}", symbol)));
        }
        Ok(())
    }

    /// Value every position against `quotes` (keyed by symbol) and add `cash`.
    pub async fn summary(
        &self,
        quotes: &HashMap<String, Quote>,
        cash: Decimal,
    ) -> Result<PortfolioSummary> {
        let positions = self.get_all_positions().await?;
        Ok(summarize(&positions, quotes, cash))
    }
}

/// Portfolio arithmetic. Positions without a usable quote are valued at cost.
pub fn summarize(
    positions: &[Position],
    quotes: &HashMap<String, Quote>,
    cash: Decimal,
) -> PortfolioSummary {
    let mut valuations = Vec::with_capacity(positions.len());
    let mut unpriced = Vec::new();

    for position in positions {
        let cost_basis = position.shares * position.average_cost;
        let quote = quotes.get(&position.symbol);
        let current_price = quote.and_then(|q| price(q.price));

        let (market_value, daily_change) = match (quote, current_price) {
            (Some(q), Some(p)) => {
                let change = Decimal::from_f64(q.change).unwrap_or_default();
                (position.shares * p, position.shares * change)
            }
            _ => {
                unpriced.push(position.symbol.clone());
                (cost_basis, Decimal::ZERO)
            }
        };
        let unrealized_pnl = market_value - cost_basis;

        valuations.push(PositionValuation {
            symbol: position.symbol.clone(),
            shares: position.shares,
            average_cost: position.average_cost,
            current_price,
            market_value: market_value.round_dp(2),
            cost_basis: cost_basis.round_dp(2),
            unrealized_pnl: unrealized_pnl.round_dp(2),
            unrealized_pnl_percent: percent(unrealized_pnl, cost_basis),
            daily_change: daily_change.round_dp(2),
            daily_change_percent: percent(daily_change, market_value - daily_change),
            weight_percent: 0.0,
        });
    }

    let invested: Decimal = valuations.iter().map(|v| v.market_value).sum();
    let cost_basis: Decimal = valuations.iter().map(|v| v.cost_basis).sum();
    let daily_change: Decimal = valuations.iter().map(|v| v.daily_change).sum();
    let total_value = invested + cash;
    for v in &mut valuations {
        v.weight_percent = percent(v.market_value, total_value);
    }

    PortfolioSummary {
        total_value,
        invested_value: invested,
        cash,
        cost_basis,
        unrealized_pnl: invested - cost_basis,
        unrealized_pnl_percent: percent(invested - cost_basis, cost_basis),
        daily_change,
        daily_change_percent: percent(daily_change, total_value - daily_change),
        position_count: valuations.len(),
        unpriced_symbols: unpriced,
        positions: valuations,
        timestamp: Utc::now(),
    }
}
