pub mod analyses;
pub mod db;
pub mod models;
pub mod portfolio;
pub mod quotes;

pub use analyses::AnalysisHistory;
pub use db::{ResearchDb, StoreError};
pub use models::*;
pub use portfolio::{summarize, PortfolioManager};
pub use quotes::QuoteHistory;
