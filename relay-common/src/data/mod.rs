// data/mod.rs
pub mod classify;
pub mod store;
pub mod types;

// Re-export main interfaces for easy access
pub use classify::{classify_notional, BucketConfig, LARGE_TRADE_BUCKET};
pub use store::{InMemoryTradeStore, RedisTradeStore, TradeWindowStore};
pub use types::{AnalysisSnapshot, DataError, DataResult, LargeTrade, TradeEvent, TradeSide};
