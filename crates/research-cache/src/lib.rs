//! Shared cache layer.
//!
//! Everything here runs on top of a [`CacheStore`]: Redis when `REDIS_URL`
//! points at a reachable server, otherwise an in-process store with the same
//! semantics so the service keeps working without Redis.

pub mod analysis_cache;
pub mod memory;
pub mod metrics;
pub mod quote_cache;
pub mod rate_limit;
pub mod redis_store;
pub mod store;

pub use analysis_cache::AnalysisCache;
pub use memory::MemoryStore;
pub use metrics::{AiRequestRecord, DailyUsage, UsageAlert, UsageMonitor, UsageSnapshot};
pub use quote_cache::{QuoteCache, QuoteCacheStats};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use redis_store::RedisStore;
pub use store::*;
