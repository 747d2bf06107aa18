use research_core::{AnalysisLevel, StockAnalysis};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::CacheStore;

/// Caches finished analyses per symbol, level and request parameters.
pub struct AnalysisCache {
    store: Arc<dyn CacheStore>,
}

impl AnalysisCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// `ai_analysis:{hash}` over the symbol, level and the caller's parameter string.
    pub fn cache_key(symbol: &str, level: AnalysisLevel, params: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(symbol.to_uppercase().as_bytes());
        hasher.update(b":");
        hasher.update(level.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(params.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("ai_analysis:{}", &digest[..32])
    }

    pub async fn get(&self, key: &str) -> Option<StockAnalysis> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!("Analysis cache read failed: {}", e);
                return None;
            }
        };
        match serde_json::from_str::<StockAnalysis>(&raw) {
            Ok(mut analysis) => {
                analysis.is_cached = true;
                Some(analysis)
            }
            Err(e) => {
                tracing::warn!("Discarding undecodable analysis {}: {}", key, e);
                None
            }
        }
    }

    pub async fn put(&self, key: &str, analysis: &StockAnalysis) {
        let ttl = Duration::from_secs(analysis.analysis_level.cache_ttl_secs());
        match serde_json::to_string(analysis) {
            Ok(payload) => {
                if let Err(e) = self.store.set_ex(key, &payload, ttl).await {
                    tracing::warn!("Analysis cache write failed for {}: {}", analysis.symbol, e);
                }
            }
            Err(e) => tracing::warn!("Failed to serialize analysis for {}: {}", analysis.symbol, e),
        }
    }
}
