//! Size-bucket classification of trade notional values.
//!
//! The same function is used everywhere bucket membership is evaluated
//! (histogram aggregation and large-trade extraction), so identical inputs
//! always classify identically.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::types::TradeEvent;

/// Bucket number assigned to large trades
pub const LARGE_TRADE_BUCKET: u32 = 11;

/// Highest bucket assignable below the large-trade threshold
const MAX_REGULAR_BUCKET: u32 = 10;

/// Notional thresholds for bucket classification.
///
/// `bucket_width` must be positive; this is enforced when configuration is
/// loaded.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    /// Notional width of each regular bucket, in quote-currency units
    pub bucket_width: Decimal,
    /// Notional at or above which a trade is classified as large
    pub large_trade_threshold: Decimal,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            bucket_width: Decimal::from(10_000),
            large_trade_threshold: Decimal::from(100_000),
        }
    }
}

/// Classify a notional value into a size bucket.
///
/// Trades at or above the large-trade threshold are bucket 11; everything
/// else falls into buckets 1..=10 by `floor(notional / bucket_width) + 1`.
pub fn classify_notional(notional: Decimal, config: &BucketConfig) -> u32 {
    if notional >= config.large_trade_threshold {
        return LARGE_TRADE_BUCKET;
    }

    let bucket = (notional / config.bucket_width)
        .floor()
        .to_u32()
        .unwrap_or(MAX_REGULAR_BUCKET)
        .saturating_add(1);

    bucket.min(MAX_REGULAR_BUCKET)
}

/// Classify a trade by its notional value
pub fn classify_trade(trade: &TradeEvent, config: &BucketConfig) -> u32 {
    classify_notional(trade.notional(), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn notional(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn classification_matches_expected_buckets() {
        let config = BucketConfig::default();

        assert_eq!(classify_notional(notional("500"), &config), 1);
        assert_eq!(classify_notional(notional("9999.99"), &config), 1);
        assert_eq!(classify_notional(notional("10000"), &config), 2);
        assert_eq!(classify_notional(notional("50000"), &config), 6);
        assert_eq!(classify_notional(notional("99999.99"), &config), 10);
    }

    #[test]
    fn threshold_boundary_is_large_trade() {
        let config = BucketConfig::default();

        assert_eq!(classify_notional(notional("100000"), &config), LARGE_TRADE_BUCKET);
        assert_eq!(
            classify_notional(notional("5000000"), &config),
            LARGE_TRADE_BUCKET
        );
    }

    #[test]
    fn identical_notional_classifies_identically() {
        let config = BucketConfig::default();

        // 50000 x 1 and 1 x 50000 have the same notional
        let a = TradeEvent::new(
            1,
            notional("50000"),
            Decimal::ONE,
            0,
            false,
            "BTCUSDT".to_string(),
        );
        let b = TradeEvent::new(
            2,
            Decimal::ONE,
            notional("50000"),
            0,
            true,
            "ETHUSDT".to_string(),
        );

        assert_eq!(classify_trade(&a, &config), classify_trade(&b, &config));
        assert_eq!(classify_trade(&a, &config), 6);
    }

    #[test]
    fn custom_thresholds_shift_buckets() {
        let config = BucketConfig {
            bucket_width: Decimal::from(1_000),
            large_trade_threshold: Decimal::from(5_000),
        };

        assert_eq!(classify_notional(notional("2500"), &config), 3);
        assert_eq!(classify_notional(notional("5000"), &config), LARGE_TRADE_BUCKET);
    }

    #[test]
    fn sub_threshold_buckets_are_capped() {
        // A wide threshold relative to the bucket width must not produce
        // regular buckets above 10.
        let config = BucketConfig {
            bucket_width: Decimal::from(1_000),
            large_trade_threshold: Decimal::from(100_000),
        };

        assert_eq!(classify_notional(notional("99000"), &config), 10);
    }
}
