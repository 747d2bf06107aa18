use async_trait::async_trait;
use crate::{Bar, ChatCompletion, ChatRequest, CircuitState, Quote, ResearchError};

/// Source of market quotes
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn get_quote(&self, symbol: &str) -> Result<Quote, ResearchError>;

    async fn get_history(
        &self,
        symbol: &str,
        range: &str,
        interval: &str,
    ) -> Result<Vec<Bar>, ResearchError>;

    async fn health_check(&self) -> bool;

    /// Breaker state when the provider guards its calls with one.
    async fn circuit_state(&self) -> Option<CircuitState> {
        None
    }
}

/// Chat-completion language model
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion, ResearchError>;
}
