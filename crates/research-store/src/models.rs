use chrono::{DateTime, Utc};
use research_core::StockAnalysis;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::StoreError;

/// Holding in the research portfolio. Share counts and costs are exact decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Position {
    pub id: i64,
    pub symbol: String,
    pub shares: Decimal,
    pub average_cost: Decimal,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Decimals live in TEXT columns so no precision is lost in SQLite.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PositionRow {
    pub id: i64,
    pub symbol: String,
    pub shares: String,
    pub average_cost: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PositionRow> for Position {
    type Error = StoreError;

    fn try_from(row: PositionRow) -> Result<Self, Self::Error> {
        let decimal = |field: &str, raw: &str| {
            raw.parse::<Decimal>()
                .map_err(|e| StoreError::Corrupt(format!("{} {} for {}: {}", field, raw, row.symbol, e)))
        };
        Ok(Position {
            shares: decimal("shares", &row.shares)?,
            average_cost: decimal("average_cost", &row.average_cost)?,
            id: row.id,
            symbol: row.symbol,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PositionInput {
    pub symbol: String,
    pub shares: Decimal,
    /// Price paid per share
    pub price: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PositionValuation {
    pub symbol: String,
    pub shares: Decimal,
    pub average_cost: Decimal,
    /// None when no quote was available; the position is then valued at cost
    pub current_price: Option<Decimal>,
    pub market_value: Decimal,
    pub cost_basis: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_percent: f64,
    pub daily_change: Decimal,
    pub daily_change_percent: f64,
    pub weight_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PortfolioSummary {
    /// Market value of all positions plus cash
    pub total_value: Decimal,
    pub invested_value: Decimal,
    pub cash: Decimal,
    pub cost_basis: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_percent: f64,
    pub daily_change: Decimal,
    pub daily_change_percent: f64,
    pub position_count: usize,
    /// Symbols valued at cost because no quote was available
    pub unpriced_symbols: Vec<String>,
    pub positions: Vec<PositionValuation>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct QuoteSnapshot {
    pub id: i64,
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: i64,
    pub market_status: String,
    pub source: String,
    pub quoted_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AnalysisRow {
    pub id: i64,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Stored analysis with its row metadata.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AnalysisRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub analysis: StockAnalysis,
}

impl TryFrom<AnalysisRow> for AnalysisRecord {
    type Error = StoreError;

    fn try_from(row: AnalysisRow) -> Result<Self, Self::Error> {
        Ok(AnalysisRecord {
            id: row.id,
            created_at: row.created_at,
            analysis: serde_json::from_str(&row.payload)?,
        })
    }
}
