// relay/mod.rs
pub mod errors;
pub mod publisher;
pub mod subscriber;

// Re-export main interfaces for easy access
pub use errors::{RelayError, RelayResult};
pub use publisher::{BusTransport, RedisBusTransport, TradePublisher};
pub use subscriber::TradeSubscriber;

/// Bus channel prefix carrying raw trade events
pub const TRADE_CHANNEL_PREFIX: &str = "trade:";

/// Bus channel prefix carrying analysis snapshots
pub const ANALYSIS_CHANNEL_PREFIX: &str = "analysis:";

/// Channel name for a symbol's raw trade stream
pub fn trade_channel(symbol: &str) -> String {
    format!("{}{}", TRADE_CHANNEL_PREFIX, symbol.to_lowercase())
}

/// Channel name for a symbol's analysis stream
pub fn analysis_channel(symbol: &str) -> String {
    format!("{}{}", ANALYSIS_CHANNEL_PREFIX, symbol.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_use_lowercased_symbol() {
        assert_eq!(trade_channel("BTCUSDT"), "trade:btcusdt");
        assert_eq!(analysis_channel("BTCUSDT"), "analysis:btcusdt");
        assert_eq!(trade_channel("ethusdt"), "trade:ethusdt");
    }
}
