use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::{interval, sleep};
use tracing::{debug, info, warn};

use crate::config::AnalysisSettings;
use crate::metrics;
use crate::relay::TradePublisher;
use relay_common::data::classify::{classify_notional, BucketConfig, LARGE_TRADE_BUCKET};
use relay_common::data::store::TradeWindowStore;
use relay_common::data::types::{AnalysisSnapshot, DataResult, LargeTrade, TradeEvent, TradeSide};

/// Resolved aggregation parameters
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Minimum spacing between aggregation cycles for one symbol
    pub interval: Duration,
    /// Period of the proactive aggregation trigger
    pub trigger_interval: Duration,
    /// Window size required before the trigger runs a cycle
    pub min_trades: usize,
    /// Trades read from the window per cycle
    pub window_read_limit: usize,
    pub buckets: BucketConfig,
    pub volatility_threshold: Decimal,
    /// Time zone defining the trading day
    pub timezone: Tz,
    pub day_start_hour: u32,
    pub day_start_minute: u32,
}

impl AnalysisConfig {
    pub fn from_settings(settings: &AnalysisSettings) -> Result<Self, rust_decimal::Error> {
        Ok(Self {
            interval: Duration::from_secs(settings.interval_secs),
            trigger_interval: Duration::from_secs(settings.trigger_interval_secs),
            min_trades: settings.min_trades,
            window_read_limit: settings.window_read_limit,
            buckets: BucketConfig {
                bucket_width: Decimal::try_from(settings.bucket_width)?,
                large_trade_threshold: Decimal::try_from(settings.large_trade_threshold)?,
            },
            volatility_threshold: Decimal::try_from(settings.volatility_threshold)?,
            timezone: settings.timezone,
            day_start_hour: settings.day_start_hour,
            day_start_minute: settings.day_start_minute,
        })
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            trigger_interval: Duration::from_secs(5),
            min_trades: 10,
            window_read_limit: 100,
            buckets: BucketConfig::default(),
            volatility_threshold: Decimal::from(1_000),
            timezone: chrono_tz::Asia::Seoul,
            day_start_hour: 8,
            day_start_minute: 0,
        }
    }
}

/// Per-symbol rolling analytics over the trade stream.
///
/// Every inbound tick is re-published immediately and appended to the
/// symbol's rolling window; rate-limited aggregation cycles read the window
/// back and publish an [`AnalysisSnapshot`]. Failures on the publish path
/// are logged and never propagate into the tick pipeline.
pub struct AnalysisEngine {
    store: Arc<dyn TradeWindowStore>,
    publisher: Arc<TradePublisher>,
    config: AnalysisConfig,
    last_analyzed: Mutex<HashMap<String, Instant>>,
}

impl AnalysisEngine {
    pub fn new(
        store: Arc<dyn TradeWindowStore>,
        publisher: Arc<TradePublisher>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
            last_analyzed: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one inbound tick: pass it through to the bus, append it to
    /// the rolling window, then evaluate whether a cycle is due.
    pub async fn on_trade(&self, trade: &TradeEvent) {
        if let Err(e) = self.publisher.publish_trade(&trade.symbol, trade).await {
            warn!("Pass-through publish failed for {}: {}", trade.symbol, e);
        }

        if let Err(e) = self.store.append_trade(trade).await {
            warn!(
                "Failed to append trade to window for {}: {}",
                trade.symbol, e
            );
        }

        self.maybe_analyze(&trade.symbol).await;
    }

    /// Run an aggregation cycle unless one ran within the rate-limit
    /// interval for this symbol.
    pub async fn maybe_analyze(&self, symbol: &str) {
        {
            let mut last = self.last_analyzed.lock();
            if let Some(prev) = last.get(symbol) {
                if prev.elapsed() < self.config.interval {
                    return;
                }
            }
            last.insert(symbol.to_string(), Instant::now());
        }

        if let Err(e) = self.run_cycle(symbol).await {
            warn!("Aggregation cycle failed for {}: {}", symbol, e);
        }
    }

    async fn run_cycle(&self, symbol: &str) -> DataResult<()> {
        let trades = self.window(symbol).await?;

        let day_start = trading_day_start_millis(&self.config, Utc::now());
        let current_day: Vec<TradeEvent> = trades
            .into_iter()
            .filter(|t| t.timestamp_ms >= day_start)
            .collect();

        if current_day.is_empty() {
            return Ok(());
        }

        let snapshot = build_snapshot(&current_day, &self.config);

        if let Err(e) = self.publisher.publish_analysis(symbol, &snapshot).await {
            warn!("Snapshot publish failed for {}: {}", symbol, e);
        }
        self.store.append_snapshot(&snapshot).await?;

        metrics::SNAPSHOTS_PUBLISHED_TOTAL.inc();
        debug!(
            "Aggregation cycle for {}: {} trades, imbalance {}",
            symbol,
            current_day.len(),
            snapshot.volume_imbalance
        );
        Ok(())
    }

    /// Size-bucket histogram over the symbol's current window
    pub async fn bucket_counts(&self, symbol: &str) -> DataResult<BTreeMap<u32, u64>> {
        let trades = self.window(symbol).await?;

        let mut counts = BTreeMap::new();
        for trade in &trades {
            let bucket = classify_notional(trade.notional(), &self.config.buckets);
            *counts.entry(bucket).or_insert(0u64) += 1;
        }
        Ok(counts)
    }

    /// Number of large trades in the window initiated by buyers
    pub async fn large_buy_count(&self, symbol: &str) -> DataResult<u64> {
        self.count_large(symbol, TradeSide::Buy).await
    }

    /// Number of large trades in the window initiated by sellers
    pub async fn large_sell_count(&self, symbol: &str) -> DataResult<u64> {
        self.count_large(symbol, TradeSide::Sell).await
    }

    /// Whether the window's volume imbalance currently exceeds `threshold`
    pub async fn has_recent_volatility(
        &self,
        symbol: &str,
        threshold: Decimal,
    ) -> DataResult<bool> {
        let trades = self.window(symbol).await?;

        let mut buy_volume = Decimal::ZERO;
        let mut sell_volume = Decimal::ZERO;
        for trade in &trades {
            match trade.aggressor_side() {
                TradeSide::Buy => buy_volume += trade.notional(),
                TradeSide::Sell => sell_volume += trade.notional(),
            }
        }
        Ok((buy_volume - sell_volume).abs() > threshold)
    }

    async fn count_large(&self, symbol: &str, side: TradeSide) -> DataResult<u64> {
        let trades = self.window(symbol).await?;
        Ok(trades
            .iter()
            .filter(|t| {
                t.aggressor_side() == side
                    && classify_notional(t.notional(), &self.config.buckets) == LARGE_TRADE_BUCKET
            })
            .count() as u64)
    }

    async fn window(&self, symbol: &str) -> DataResult<Vec<TradeEvent>> {
        self.store
            .recent_trades(symbol, self.config.window_read_limit)
            .await
    }

    /// Spawn the proactive aggregation trigger and the daily reset job
    pub fn spawn_scheduled_jobs(
        self: &Arc<Self>,
        symbols: Vec<String>,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            self.spawn_analysis_trigger(symbols.clone(), shutdown_tx.subscribe()),
            self.spawn_daily_reset(symbols, shutdown_tx.subscribe()),
        ]
    }

    /// Periodically run cycles for symbols with enough buffered trades,
    /// so aggregation still happens when inbound traffic is sparse.
    fn spawn_analysis_trigger(
        self: &Arc<Self>,
        symbols: Vec<String>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(engine.config.trigger_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for symbol in &symbols {
                            match engine.store.trade_count(symbol).await {
                                Ok(count) if count >= engine.config.min_trades => {
                                    engine.maybe_analyze(symbol).await;
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    warn!("Failed to read window size for {}: {}", symbol, e);
                                }
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Analysis trigger stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Clear each symbol's window and analysis log once per day at the
    /// trading-day boundary. Sole mechanism for discarding stale history.
    fn spawn_daily_reset(
        self: &Arc<Self>,
        symbols: Vec<String>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = next_daily_reset(&engine.config, now);
                let wait = (next - now)
                    .to_std()
                    .unwrap_or(Duration::from_secs(60));
                debug!("Next daily reset at {} ({}s away)", next, wait.as_secs());

                tokio::select! {
                    _ = sleep(wait) => {
                        info!("Daily reset: clearing history for {} symbols", symbols.len());
                        for symbol in &symbols {
                            if let Err(e) = engine.store.clear_symbol(symbol).await {
                                warn!("Daily reset failed for {}: {}", symbol, e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Daily reset job stopped");
                        break;
                    }
                }
            }
        })
    }
}

/// Build a snapshot from the trades of the current trading day.
///
/// `trades` must be non-empty; callers skip the cycle otherwise.
fn build_snapshot(trades: &[TradeEvent], config: &AnalysisConfig) -> AnalysisSnapshot {
    let symbol = trades[0].symbol.clone();

    let mut buy_volume = Decimal::ZERO;
    let mut sell_volume = Decimal::ZERO;
    let mut level_counts: BTreeMap<u32, u64> = BTreeMap::new();
    let mut large: Vec<&TradeEvent> = Vec::new();

    for trade in trades {
        let notional = trade.notional();
        match trade.aggressor_side() {
            TradeSide::Buy => buy_volume += notional,
            TradeSide::Sell => sell_volume += notional,
        }

        let bucket = classify_notional(notional, &config.buckets);
        *level_counts.entry(bucket).or_insert(0) += 1;
        if bucket == LARGE_TRADE_BUCKET {
            large.push(trade);
        }
    }

    large.sort_by_key(|t| t.timestamp_ms);
    let large_trades = large
        .iter()
        .map(|t| LargeTrade {
            side: t.aggressor_side(),
            quantity: t.quantity,
            price: t.price,
            notional: t.notional(),
            timestamp: format_trade_time(t.timestamp_ms, config.timezone),
        })
        .collect();

    let latest_ms = trades.iter().map(|t| t.timestamp_ms).max().unwrap_or(0);
    let volume_imbalance = (buy_volume - sell_volume).abs();

    AnalysisSnapshot {
        symbol,
        latest_trade_time: format_trade_time(latest_ms, config.timezone),
        level_counts,
        large_trades,
        buy_volume,
        sell_volume,
        volume_imbalance,
        volatility_flag: volume_imbalance > config.volatility_threshold,
    }
}

fn format_trade_time(timestamp_ms: i64, tz: Tz) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Epoch millis at which the current trading day began.
///
/// The trading day starts at the configured local wall-clock time; before
/// that time of day, the current trading day began yesterday.
fn trading_day_start_millis(config: &AnalysisConfig, now: DateTime<Utc>) -> i64 {
    let local_now = now.with_timezone(&config.timezone);
    let boundary = NaiveTime::from_hms_opt(config.day_start_hour, config.day_start_minute, 0)
        .unwrap_or(NaiveTime::MIN);

    let candidate = config
        .timezone
        .from_local_datetime(&local_now.date_naive().and_time(boundary))
        .earliest()
        .unwrap_or(local_now);

    let day_start = if candidate > local_now {
        candidate - chrono::Duration::days(1)
    } else {
        candidate
    };

    day_start.timestamp_millis()
}

/// Next wall-clock occurrence of the daily reset, in UTC
fn next_daily_reset(config: &AnalysisConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    let local_now = now.with_timezone(&config.timezone);
    let boundary = NaiveTime::from_hms_opt(config.day_start_hour, config.day_start_minute, 0)
        .unwrap_or(NaiveTime::MIN);

    let candidate = config
        .timezone
        .from_local_datetime(&local_now.date_naive().and_time(boundary))
        .earliest()
        .unwrap_or(local_now);

    let next = if candidate > local_now {
        candidate
    } else {
        candidate + chrono::Duration::days(1)
    };

    next.with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PublisherSettings;
    use crate::relay::{BusTransport, RelayResult};
    use async_trait::async_trait;
    use relay_common::data::store::InMemoryTradeStore;
    use std::str::FromStr;

    /// Transport that records every published (channel, payload) pair
    struct RecordingTransport {
        published: Mutex<Vec<(String, String)>>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
            }
        }

        fn on_channel(&self, prefix: &str) -> Vec<String> {
            self.published
                .lock()
                .iter()
                .filter(|(channel, _)| channel.starts_with(prefix))
                .map(|(_, payload)| payload.clone())
                .collect()
        }
    }

    #[async_trait]
    impl BusTransport for RecordingTransport {
        async fn publish(&self, channel: &str, payload: &str) -> RelayResult<u64> {
            self.published
                .lock()
                .push((channel.to_string(), payload.to_string()));
            Ok(1)
        }
    }

    fn utc_config() -> AnalysisConfig {
        AnalysisConfig {
            timezone: chrono_tz::UTC,
            day_start_hour: 0,
            day_start_minute: 0,
            ..AnalysisConfig::default()
        }
    }

    fn engine_fixture(config: AnalysisConfig) -> (Arc<AnalysisEngine>, Arc<RecordingTransport>) {
        let store = Arc::new(InMemoryTradeStore::new(1000));
        let transport = Arc::new(RecordingTransport::new());
        let publisher = Arc::new(TradePublisher::new(
            transport.clone(),
            PublisherSettings::default(),
        ));
        let engine = Arc::new(AnalysisEngine::new(store, publisher, config));
        (engine, transport)
    }

    fn trade(trade_id: u64, price: i64, quantity: i64, timestamp_ms: i64, seller: bool) -> TradeEvent {
        TradeEvent::new(
            trade_id,
            Decimal::from(price),
            Decimal::from(quantity),
            timestamp_ms,
            seller,
            "BTCUSDT".to_string(),
        )
    }

    #[test]
    fn snapshot_aggregates_volume_and_buckets() {
        // 6 aggressor-buy trades at notional 50000 and 4 aggressor-sell
        // trades at notional 10000 within one window
        let mut trades = Vec::new();
        for id in 0..6 {
            trades.push(trade(id, 50_000, 1, 1_000 + id as i64, false));
        }
        for id in 6..10 {
            trades.push(trade(id, 10_000, 1, 1_000 + id as i64, true));
        }

        let snapshot = build_snapshot(&trades, &utc_config());

        assert_eq!(snapshot.symbol, "BTCUSDT");
        assert_eq!(snapshot.buy_volume, Decimal::from(300_000));
        assert_eq!(snapshot.sell_volume, Decimal::from(40_000));
        assert_eq!(snapshot.volume_imbalance, Decimal::from(260_000));
        assert!(snapshot.volatility_flag);
        assert_eq!(snapshot.level_counts, BTreeMap::from([(6, 6), (2, 4)]));
        assert!(snapshot.large_trades.is_empty());
    }

    #[test]
    fn volume_sums_count_each_trade_exactly_once() {
        let trades = vec![
            trade(1, 123, 2, 1, false),
            trade(2, 456, 3, 2, true),
            trade(3, 789, 1, 3, false),
        ];

        let snapshot = build_snapshot(&trades, &utc_config());

        let total: Decimal = trades.iter().map(|t| t.notional()).sum();
        assert_eq!(snapshot.buy_volume + snapshot.sell_volume, total);

        let counted: u64 = snapshot.level_counts.values().sum();
        assert_eq!(counted, trades.len() as u64);
    }

    #[test]
    fn large_trades_are_bucket_eleven_sorted_by_time() {
        let trades = vec![
            trade(1, 200_000, 1, 3_000, true),
            trade(2, 50_000, 1, 1_000, false),
            trade(3, 150_000, 1, 2_000, false),
        ];

        let snapshot = build_snapshot(&trades, &utc_config());

        assert_eq!(snapshot.large_trades.len(), 2);
        assert_eq!(snapshot.large_trades[0].notional, Decimal::from(150_000));
        assert_eq!(snapshot.large_trades[0].side, TradeSide::Buy);
        assert_eq!(snapshot.large_trades[1].notional, Decimal::from(200_000));
        assert_eq!(snapshot.large_trades[1].side, TradeSide::Sell);
        assert_eq!(snapshot.level_counts.get(&LARGE_TRADE_BUCKET), Some(&2));
    }

    #[test]
    fn volatility_flag_requires_strictly_exceeding_threshold() {
        let config = AnalysisConfig {
            volatility_threshold: Decimal::from(1_000),
            ..utc_config()
        };

        // Imbalance exactly at the threshold does not raise the flag
        let trades = vec![trade(1, 1_000, 1, 1, false)];
        let snapshot = build_snapshot(&trades, &config);
        assert_eq!(snapshot.volume_imbalance, Decimal::from(1_000));
        assert!(!snapshot.volatility_flag);

        let trades = vec![trade(1, 1_001, 1, 1, false)];
        let snapshot = build_snapshot(&trades, &config);
        assert!(snapshot.volatility_flag);
    }

    #[test]
    fn latest_trade_time_is_window_maximum() {
        let config = utc_config();
        let trades = vec![
            trade(1, 100, 1, 1_672_515_782_000, false),
            trade(2, 100, 1, 1_672_515_790_000, false),
            trade(3, 100, 1, 1_672_515_785_000, false),
        ];

        let snapshot = build_snapshot(&trades, &config);
        assert_eq!(snapshot.latest_trade_time, "2022-12-31 19:43:10");
    }

    #[test]
    fn trading_day_start_respects_boundary() {
        let config = AnalysisConfig {
            timezone: chrono_tz::UTC,
            day_start_hour: 8,
            day_start_minute: 0,
            ..AnalysisConfig::default()
        };

        // After the boundary the day started this morning
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap();
        assert_eq!(
            trading_day_start_millis(&config, now),
            expected.timestamp_millis()
        );

        // Before the boundary the current trading day began yesterday
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 6, 0, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).unwrap();
        assert_eq!(
            trading_day_start_millis(&config, now),
            expected.timestamp_millis()
        );
    }

    #[test]
    fn daily_reset_schedules_next_occurrence() {
        let config = AnalysisConfig {
            timezone: chrono_tz::UTC,
            day_start_hour: 8,
            day_start_minute: 0,
            ..AnalysisConfig::default()
        };

        let now = Utc.with_ymd_and_hms(2026, 3, 10, 6, 0, 0).unwrap();
        assert_eq!(
            next_daily_reset(&config, now),
            Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap()
        );

        let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        assert_eq!(
            next_daily_reset(&config, now),
            Utc.with_ymd_and_hms(2026, 3, 11, 8, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn on_trade_republishes_and_buffers_every_tick() {
        let (engine, transport) = engine_fixture(utc_config());
        let now_ms = Utc::now().timestamp_millis();

        engine.on_trade(&trade(1, 100, 1, now_ms, false)).await;
        engine.on_trade(&trade(2, 100, 1, now_ms, true)).await;

        assert_eq!(transport.on_channel("trade:").len(), 2);
        assert_eq!(engine.store.trade_count("BTCUSDT").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn aggregation_is_rate_limited_per_symbol() {
        let (engine, transport) = engine_fixture(utc_config());
        let now_ms = Utc::now().timestamp_millis();

        // The first tick triggers a cycle; the second arrives well inside
        // the rate-limit interval and must not
        engine.on_trade(&trade(1, 50_000, 1, now_ms, false)).await;
        engine.on_trade(&trade(2, 50_000, 1, now_ms, false)).await;

        let snapshots = transport.on_channel("analysis:");
        assert_eq!(snapshots.len(), 1);

        let snapshot: AnalysisSnapshot = serde_json::from_str(&snapshots[0]).unwrap();
        assert_eq!(snapshot.buy_volume, Decimal::from(50_000));
    }

    #[tokio::test]
    async fn cycle_filters_out_previous_day_trades() {
        let (engine, transport) = engine_fixture(utc_config());
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let stale_ms = (now - chrono::Duration::days(2)).timestamp_millis();

        engine.store.append_trade(&trade(1, 70_000, 1, stale_ms, false)).await.unwrap();
        engine.store.append_trade(&trade(2, 80_000, 1, now_ms, false)).await.unwrap();
        engine.maybe_analyze("BTCUSDT").await;

        let snapshots = transport.on_channel("analysis:");
        assert_eq!(snapshots.len(), 1);

        let snapshot: AnalysisSnapshot = serde_json::from_str(&snapshots[0]).unwrap();
        assert_eq!(snapshot.buy_volume, Decimal::from(80_000));
        let counted: u64 = snapshot.level_counts.values().sum();
        assert_eq!(counted, 1);
    }

    #[tokio::test]
    async fn empty_window_produces_no_snapshot() {
        let (engine, transport) = engine_fixture(utc_config());

        engine.maybe_analyze("BTCUSDT").await;

        assert!(transport.on_channel("analysis:").is_empty());
    }

    #[tokio::test]
    async fn window_queries_count_large_trades_by_side() {
        let (engine, _) = engine_fixture(utc_config());

        engine.store.append_trade(&trade(1, 150_000, 1, 1, false)).await.unwrap();
        engine.store.append_trade(&trade(2, 200_000, 1, 2, true)).await.unwrap();
        engine.store.append_trade(&trade(3, 50_000, 1, 3, false)).await.unwrap();

        assert_eq!(engine.large_buy_count("BTCUSDT").await.unwrap(), 1);
        assert_eq!(engine.large_sell_count("BTCUSDT").await.unwrap(), 1);

        let counts = engine.bucket_counts("BTCUSDT").await.unwrap();
        assert_eq!(counts, BTreeMap::from([(6, 1), (11, 2)]));

        // An untracked symbol has an empty window
        assert_eq!(engine.large_buy_count("ETHUSDT").await.unwrap(), 0);
        assert!(engine.bucket_counts("ETHUSDT").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recent_volatility_compares_against_threshold() {
        let (engine, _) = engine_fixture(utc_config());

        engine.store.append_trade(&trade(1, 5_000, 1, 1, false)).await.unwrap();
        engine.store.append_trade(&trade(2, 2_000, 1, 2, true)).await.unwrap();

        // Imbalance is 3000; strictly-greater comparison
        assert!(engine
            .has_recent_volatility("BTCUSDT", Decimal::from(1_000))
            .await
            .unwrap());
        assert!(!engine
            .has_recent_volatility("BTCUSDT", Decimal::from(3_000))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn snapshots_are_appended_to_the_analysis_log() {
        let store = Arc::new(InMemoryTradeStore::new(1000));
        let transport = Arc::new(RecordingTransport::new());
        let publisher = Arc::new(TradePublisher::new(
            transport.clone(),
            PublisherSettings::default(),
        ));
        let engine = Arc::new(AnalysisEngine::new(
            store.clone(),
            publisher,
            utc_config(),
        ));

        let now_ms = Utc::now().timestamp_millis();
        engine.on_trade(&trade(1, 50_000, 1, now_ms, false)).await;

        let log = store.snapshots("BTCUSDT");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].buy_volume, Decimal::from_str("50000").unwrap());
    }
}
