use crate::db::{ResearchDb, Result, StoreError};
use crate::models::{AnalysisRecord, AnalysisRow};
use chrono::Utc;
use research_core::{StockAnalysis, ValidationStatus};

/// Stored analyses: the full JSON plus the columns worth querying on.
pub struct AnalysisHistory {
    db: ResearchDb,
}

impl AnalysisHistory {
    pub fn new(db: ResearchDb) -> Self {
        Self { db }
    }

    pub async fn record(&self, analysis: &StockAnalysis) -> Result<i64> {
        let payload = serde_json::to_string(analysis)?;
        let validation = match analysis.validation.status {
            ValidationStatus::Valid => "valid",
            ValidationStatus::Warning => "warning",
            ValidationStatus::Invalid => "invalid",
            ValidationStatus::RequiresHumanReview => "requires_human_review",
        };

        let result = sqlx::query(
            r#"
            INSERT INTO analysis_history
                (symbol, recommendation, confidence, analysis_level, model_used,
                 validation_status, quality_score, estimated_cost, is_fallback, payload, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&analysis.symbol)
        .bind(analysis.recommendation.as_str())
        .bind(analysis.confidence)
        .bind(analysis.analysis_level.as_str())
        .bind(&analysis.model_used)
        .bind(validation)
        .bind(analysis.quality_score)
        .bind(analysis.estimated_cost)
        .bind(analysis.is_fallback)
        .bind(payload)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent analyses for a symbol, newest first.
    pub async fn recent(&self, symbol: &str, limit: i64) -> Result<Vec<AnalysisRecord>> {
        let rows = sqlx::query_as::<_, AnalysisRow>(
            "SELECT id, payload, created_at FROM analysis_history WHERE symbol = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(AnalysisRecord::try_from).collect()
    }

    pub async fn get(&self, id: i64) -> Result<AnalysisRecord> {
        let row = sqlx::query_as::<_, AnalysisRow>(
            "SELECT id, payload, created_at FROM analysis_history WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("analysis {}", id)))?;

        row.try_into()
    }

    /// Count of stored analyses per recommendation for a symbol.
    pub async fn recommendation_counts(&self, symbol: &str) -> Result<Vec<(String, i64)>> {
        let counts = sqlx::query_as::<_, (String, i64)>(
            "SELECT recommendation, COUNT(*) FROM analysis_history WHERE symbol = ? GROUP BY recommendation ORDER BY 2 DESC",
        )
        .bind(symbol)
        .fetch_all(self.db.pool())
        .await?;

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::{
        AnalysisLevel, Recommendation, RiskLevel, TimeHorizon, ValidationReport,
    };
    use std::collections::BTreeMap;

    fn analysis(symbol: &str, recommendation: Recommendation) -> StockAnalysis {
        StockAnalysis {
            symbol: symbol.to_string(),
            recommendation,
            confidence: 0.7,
            target_price: Some(210.0),
            reasoning: "Margins keep expanding.".to_string(),
            key_factors: vec!["Services".to_string()],
            risks: vec![],
            risk_level: RiskLevel::Medium,
            time_horizon: TimeHorizon::Medium,
            analysis: BTreeMap::new(),
            consensus: None,
            validation: ValidationReport::valid(),
            quality_score: 0.85,
            analysis_level: AnalysisLevel::Standard,
            usage: None,
            estimated_cost: 0.0004,
            model_used: "gpt-4o-mini".to_string(),
            price_at_analysis: 190.0,
            processing_time_ms: 2100,
            timestamp: Utc::now(),
            is_cached: false,
            is_fallback: false,
            fallback_reason: None,
            raw_response: None,
        }
    }

    #[tokio::test]
    async fn test_record_and_recent() {
        let history = AnalysisHistory::new(ResearchDb::new("sqlite::memory:").await.unwrap());

        history.record(&analysis("AAPL", Recommendation::Hold)).await.unwrap();
        let id = history.record(&analysis("AAPL", Recommendation::Buy)).await.unwrap();
        history.record(&analysis("NVDA", Recommendation::StrongBuy)).await.unwrap();

        let recent = history.recent("AAPL", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, id);
        assert_eq!(recent[0].analysis.recommendation, Recommendation::Buy);
        assert_eq!(recent[0].analysis.target_price, Some(210.0));

        let fetched = history.get(id).await.unwrap();
        assert_eq!(fetched.analysis.model_used, "gpt-4o-mini");
        assert!(matches!(history.get(999).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_recommendation_counts() {
        let history = AnalysisHistory::new(ResearchDb::new("sqlite::memory:").await.unwrap());
        for rec in [Recommendation::Buy, Recommendation::Buy, Recommendation::Sell] {
            history.record(&analysis("TSLA", rec)).await.unwrap();
        }

        let counts = history.recommendation_counts("TSLA").await.unwrap();
        assert_eq!(counts[0], ("BUY".to_string(), 2));
        assert_eq!(counts[1], ("SELL".to_string(), 1));
    }
}
