pub mod budget;
pub mod models;
pub mod pricing;
pub mod report;
pub mod tracker;

pub use budget::*;
pub use models::*;
pub use pricing::{data_request_rate, model_rate, token_cost, ModelRate};
pub use report::*;
pub use tracker::CostTracker;
