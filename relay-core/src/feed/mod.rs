// feed/mod.rs
pub mod binance;
pub mod errors;

// Re-export main interfaces for easy access
pub use binance::BinanceAggTradeFeed;
pub use errors::FeedError;
