use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

use super::types::{AnalysisSnapshot, DataResult, TradeEvent};

// =================================================================
// Store Interface Definition
// =================================================================

/// Rolling-window store for recent trades and the analysis log.
///
/// Keys are derived from the lower-cased symbol. The trade window is a
/// capacity-bounded, append-only list with the oldest entries evicted
/// first; the analysis log has the same shape. Both carry a time-to-live
/// so abandoned symbols expire on their own.
#[async_trait]
pub trait TradeWindowStore: Send + Sync {
    /// Append a trade to the symbol's rolling window
    async fn append_trade(&self, trade: &TradeEvent) -> DataResult<()>;

    /// Read up to `limit` of the most recent trades, oldest first
    async fn recent_trades(&self, symbol: &str, limit: usize) -> DataResult<Vec<TradeEvent>>;

    /// Number of trades currently held for the symbol
    async fn trade_count(&self, symbol: &str) -> DataResult<usize>;

    /// Append a snapshot to the symbol's analysis log
    async fn append_snapshot(&self, snapshot: &AnalysisSnapshot) -> DataResult<()>;

    /// Drop the symbol's rolling window and analysis log
    async fn clear_symbol(&self, symbol: &str) -> DataResult<()>;
}

fn trades_key(symbol: &str) -> String {
    format!("trades:{}", symbol.to_lowercase())
}

fn analysis_key(symbol: &str) -> String {
    format!("analysis:{}", symbol.to_lowercase())
}

// =================================================================
// Redis Store Implementation
// =================================================================

/// Redis-backed rolling-window store
pub struct RedisTradeStore {
    connection: MultiplexedConnection,
    window_capacity: usize,
    ttl_secs: i64,
}

impl RedisTradeStore {
    pub fn new(connection: MultiplexedConnection, window_capacity: usize, ttl_secs: i64) -> Self {
        Self {
            connection,
            window_capacity,
            ttl_secs,
        }
    }

    async fn touch_expiry(&self, key: &str) -> DataResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(self.ttl_secs)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TradeWindowStore for RedisTradeStore {
    async fn append_trade(&self, trade: &TradeEvent) -> DataResult<()> {
        let key = trades_key(&trade.symbol);
        let json = serde_json::to_string(trade)?;

        let mut conn = self.connection.clone();
        let _: () = conn.rpush(&key, &json).await?;
        let _: () = conn
            .ltrim(&key, -(self.window_capacity as isize), -1)
            .await?;
        self.touch_expiry(&key).await?;

        debug!("Appended trade {} to window {}", trade.trade_id, key);
        Ok(())
    }

    async fn recent_trades(&self, symbol: &str, limit: usize) -> DataResult<Vec<TradeEvent>> {
        let key = trades_key(symbol);

        let mut conn = self.connection.clone();
        let raw: Vec<String> = conn.lrange(&key, -(limit as isize), -1).await?;

        // Malformed list entries are skipped rather than failing the read
        let trades = raw
            .iter()
            .filter_map(|json| match serde_json::from_str::<TradeEvent>(json) {
                Ok(trade) => Some(trade),
                Err(e) => {
                    warn!("Skipping malformed window entry in {}: {}", key, e);
                    None
                }
            })
            .collect();

        Ok(trades)
    }

    async fn trade_count(&self, symbol: &str) -> DataResult<usize> {
        let mut conn = self.connection.clone();
        let len: usize = conn.llen(trades_key(symbol)).await?;
        Ok(len)
    }

    async fn append_snapshot(&self, snapshot: &AnalysisSnapshot) -> DataResult<()> {
        let key = analysis_key(&snapshot.symbol);
        let json = serde_json::to_string(snapshot)?;

        let mut conn = self.connection.clone();
        let _: () = conn.rpush(&key, &json).await?;
        self.touch_expiry(&key).await?;

        Ok(())
    }

    async fn clear_symbol(&self, symbol: &str) -> DataResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(vec![trades_key(symbol), analysis_key(symbol)])
            .await?;
        debug!("Cleared window and analysis log for {}", symbol);
        Ok(())
    }
}

// =================================================================
// In-Memory Store Implementation
// =================================================================

/// In-memory rolling-window store, used in tests and offline runs.
///
/// Entries never expire; the capacity bound and the daily clear are the
/// only eviction mechanisms.
pub struct InMemoryTradeStore {
    window_capacity: usize,
    trades: RwLock<HashMap<String, VecDeque<TradeEvent>>>,
    snapshots: RwLock<HashMap<String, Vec<AnalysisSnapshot>>>,
}

impl InMemoryTradeStore {
    pub fn new(window_capacity: usize) -> Self {
        Self {
            window_capacity,
            trades: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshots recorded for a symbol, oldest first
    pub fn snapshots(&self, symbol: &str) -> Vec<AnalysisSnapshot> {
        self.snapshots
            .read()
            .get(&symbol.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TradeWindowStore for InMemoryTradeStore {
    async fn append_trade(&self, trade: &TradeEvent) -> DataResult<()> {
        let mut trades = self.trades.write();
        let window = trades
            .entry(trade.symbol.to_lowercase())
            .or_insert_with(VecDeque::new);

        window.push_back(trade.clone());
        while window.len() > self.window_capacity {
            window.pop_front();
        }
        Ok(())
    }

    async fn recent_trades(&self, symbol: &str, limit: usize) -> DataResult<Vec<TradeEvent>> {
        let trades = self.trades.read();
        let window = match trades.get(&symbol.to_lowercase()) {
            Some(window) => window,
            None => return Ok(Vec::new()),
        };

        let skip = window.len().saturating_sub(limit);
        Ok(window.iter().skip(skip).cloned().collect())
    }

    async fn trade_count(&self, symbol: &str) -> DataResult<usize> {
        let trades = self.trades.read();
        Ok(trades
            .get(&symbol.to_lowercase())
            .map(VecDeque::len)
            .unwrap_or(0))
    }

    async fn append_snapshot(&self, snapshot: &AnalysisSnapshot) -> DataResult<()> {
        let mut snapshots = self.snapshots.write();
        snapshots
            .entry(snapshot.symbol.to_lowercase())
            .or_insert_with(Vec::new)
            .push(snapshot.clone());
        Ok(())
    }

    async fn clear_symbol(&self, symbol: &str) -> DataResult<()> {
        let key = symbol.to_lowercase();
        self.trades.write().remove(&key);
        self.snapshots.write().remove(&key);
        Ok(())
    }
}
