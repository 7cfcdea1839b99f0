use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// =================================================================
// Core data types: one exchange tick and one analysis snapshot
// =================================================================

/// Aggressor side of a trade: whether the trade was initiated by a
/// buyer or a seller. Determines buy/sell volume attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// One executed trade as reported by the upstream aggregate-trade stream.
///
/// The serde field names mirror the upstream wire format, so the same type
/// parses inbound exchange frames and round-trips over the bus channels.
/// Unknown fields in inbound frames are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeEvent {
    /// Aggregate trade id, monotonic per symbol (not globally unique)
    #[serde(rename = "a")]
    pub trade_id: u64,

    /// Trade price (sent as a decimal string by the exchange)
    #[serde(rename = "p")]
    pub price: Decimal,

    /// Trade quantity (sent as a decimal string by the exchange)
    #[serde(rename = "q")]
    pub quantity: Decimal,

    /// Exchange-assigned trade time, epoch milliseconds
    #[serde(rename = "T")]
    pub timestamp_ms: i64,

    /// Whether the buyer was the maker. True means the aggressor sold.
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,

    /// Trading pair, such as "BTCUSDT"
    #[serde(rename = "s")]
    pub symbol: String,
}

impl TradeEvent {
    pub fn new(
        trade_id: u64,
        price: Decimal,
        quantity: Decimal,
        timestamp_ms: i64,
        is_buyer_maker: bool,
        symbol: String,
    ) -> Self {
        Self {
            trade_id,
            price,
            quantity,
            timestamp_ms,
            is_buyer_maker,
            symbol,
        }
    }

    /// Notional value of the trade (price x quantity)
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }

    /// Side of the aggressor. A trade where the buyer was the maker was
    /// initiated by a seller.
    pub fn aggressor_side(&self) -> TradeSide {
        if self.is_buyer_maker {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        }
    }

    /// Event time as a UTC timestamp
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp_ms)
    }

    /// Validate field invariants after parsing an inbound frame
    pub fn validate(&self) -> DataResult<()> {
        if self.price <= Decimal::ZERO {
            return Err(DataError::InvalidFormat(format!(
                "non-positive price: {}",
                self.price
            )));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(DataError::InvalidFormat(format!(
                "non-positive quantity: {}",
                self.quantity
            )));
        }
        if self.symbol.is_empty() {
            return Err(DataError::InvalidFormat("empty symbol".to_string()));
        }
        Ok(())
    }
}

/// Summary of a single large trade included in an analysis snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LargeTrade {
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub notional: Decimal,
    /// Formatted trade time in the configured time zone
    pub timestamp: String,
}

/// Per-symbol aggregate over the current trading-day window.
///
/// Built fresh on every aggregation cycle and never mutated afterwards.
/// Serialized with camelCase field names on the bus and in the analysis log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSnapshot {
    pub symbol: String,

    /// Formatted max trade time in the window
    pub latest_trade_time: String,

    /// Size-bucket histogram: bucket number to trade count
    pub level_counts: BTreeMap<u32, u64>,

    /// All bucket-11 trades in the window, oldest first
    pub large_trades: Vec<LargeTrade>,

    /// Sum of notionals of aggressor-buy trades
    pub buy_volume: Decimal,

    /// Sum of notionals of aggressor-sell trades
    pub sell_volume: Decimal,

    /// Absolute difference between buy and sell volume
    pub volume_imbalance: Decimal,

    /// True when the imbalance exceeds the configured threshold
    pub volatility_flag: bool,
}

// =================================================================
// Error type definition
// =================================================================

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for DataError {
    fn from(err: redis::RedisError) -> Self {
        DataError::Store(err.to_string())
    }
}

pub type DataResult<T> = Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample_trade() -> TradeEvent {
        TradeEvent::new(
            26129,
            Decimal::from_str("50000.00").unwrap(),
            Decimal::from_str("0.001").unwrap(),
            1672515782136,
            true,
            "BTCUSDT".to_string(),
        )
    }

    #[test]
    fn parses_upstream_agg_trade_frame() {
        let frame = r#"{
            "e": "aggTrade",
            "E": 1672515782136,
            "s": "BTCUSDT",
            "a": 26129,
            "p": "50000.00",
            "q": "0.001",
            "f": 100,
            "l": 105,
            "T": 1672515782136,
            "m": true,
            "M": true
        }"#;

        let trade: TradeEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(trade, sample_trade());
        assert_eq!(trade.aggressor_side(), TradeSide::Sell);
        assert_eq!(trade.notional(), Decimal::from_str("50.000").unwrap());
        assert_eq!(
            trade.timestamp().unwrap().timestamp_millis(),
            1672515782136
        );
    }

    #[test]
    fn aggressor_side_follows_buyer_maker_flag() {
        let mut trade = sample_trade();
        trade.is_buyer_maker = false;
        assert_eq!(trade.aggressor_side(), TradeSide::Buy);
        trade.is_buyer_maker = true;
        assert_eq!(trade.aggressor_side(), TradeSide::Sell);
    }

    #[test]
    fn round_trips_through_bus_json() {
        let trade = sample_trade();
        let json = serde_json::to_string(&trade).unwrap();
        let parsed: TradeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, trade);
    }

    #[test]
    fn rejects_non_positive_values() {
        let mut trade = sample_trade();
        trade.price = Decimal::ZERO;
        assert!(trade.validate().is_err());

        let mut trade = sample_trade();
        trade.quantity = Decimal::from(-1);
        assert!(trade.validate().is_err());

        let mut trade = sample_trade();
        trade.symbol.clear();
        assert!(trade.validate().is_err());

        assert!(sample_trade().validate().is_ok());
    }

    #[test]
    fn snapshot_serializes_with_camel_case_fields() {
        let snapshot = AnalysisSnapshot {
            symbol: "BTCUSDT".to_string(),
            latest_trade_time: "2023-01-01 04:43:02".to_string(),
            level_counts: BTreeMap::from([(6, 2), (11, 1)]),
            large_trades: vec![],
            buy_volume: Decimal::from(300_000),
            sell_volume: Decimal::from(40_000),
            volume_imbalance: Decimal::from(260_000),
            volatility_flag: true,
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"latestTradeTime\""));
        assert!(json.contains("\"levelCounts\""));
        assert!(json.contains("\"largeTrades\""));
        assert!(json.contains("\"buyVolume\""));
        assert!(json.contains("\"volumeImbalance\""));
        assert!(json.contains("\"volatilityFlag\":true"));

        let parsed: AnalysisSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
