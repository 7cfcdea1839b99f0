// feed/binance.rs

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::errors::FeedError;
use crate::config::FeedConfig;
use crate::metrics;
use relay_common::data::types::TradeEvent;

/// Tracked state of one upstream connection.
///
/// The read loop owns the `alive` flag; the supervisor observes it instead
/// of probing the peer. The generation number guards map removal so a dying
/// read loop never removes the connection that replaced it.
struct ConnectionHandle {
    generation: u64,
    alive: Arc<AtomicBool>,
}

/// Upstream client for the per-symbol aggregate-trade streams.
///
/// Holds one long-lived WebSocket connection per tracked symbol, parses
/// each inbound frame into a [`TradeEvent`] and forwards it into the tick
/// channel. A supervisor task reconnects any symbol whose connection has
/// dropped.
#[derive(Clone)]
pub struct BinanceAggTradeFeed {
    config: FeedConfig,
    symbols: Vec<String>,
    connections: Arc<RwLock<HashMap<String, ConnectionHandle>>>,
    generation: Arc<AtomicU64>,
}

impl BinanceAggTradeFeed {
    pub fn new(config: FeedConfig, symbols: Vec<String>) -> Self {
        Self {
            config,
            symbols,
            connections: Arc::new(RwLock::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Connect every configured symbol and start the supervisor.
    ///
    /// Initial connection failures are not fatal; the supervisor keeps
    /// retrying on its own schedule. Returns the supervisor task handle.
    pub async fn start(
        &self,
        tick_tx: mpsc::Sender<TradeEvent>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> tokio::task::JoinHandle<()> {
        for symbol in &self.symbols {
            if let Err(e) = self
                .connect(symbol, tick_tx.clone(), shutdown_tx.subscribe())
                .await
            {
                error!(
                    "Initial upstream connection failed for {}: {} (supervisor will retry)",
                    symbol, e
                );
            }
        }

        self.spawn_supervisor(tick_tx, shutdown_tx)
    }

    /// Number of connections currently observed live
    pub fn live_connections(&self) -> usize {
        self.connections
            .read()
            .values()
            .filter(|handle| handle.alive.load(Ordering::SeqCst))
            .count()
    }

    /// Open one upstream connection and spawn its read loop
    async fn connect(
        &self,
        symbol: &str,
        tick_tx: mpsc::Sender<TradeEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), FeedError> {
        let url = format!(
            "{}/{}@aggTrade",
            self.config.ws_url_base,
            symbol.to_lowercase()
        );

        metrics::UPSTREAM_CONNECTIONS_TOTAL.inc();
        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| FeedError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        let alive = Arc::new(AtomicBool::new(true));
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        self.connections.write().insert(
            symbol.to_string(),
            ConnectionHandle {
                generation,
                alive: Arc::clone(&alive),
            },
        );

        info!("Upstream connection established for {}", symbol);

        let connections = Arc::clone(&self.connections);
        let symbol = symbol.to_string();

        tokio::spawn(async move {
            let (mut write, mut read) = ws_stream.split();

            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match parse_agg_trade(&text) {
                                    Ok(trade) => forward_tick(&tick_tx, trade).await,
                                    Err(FeedError::ControlMessage) => {
                                        debug!("Control message on {} stream: {}", symbol, text);
                                    }
                                    Err(e) => {
                                        metrics::TICK_PARSE_FAILURES_TOTAL.inc();
                                        warn!("Dropping unparseable frame on {} stream: {}", symbol, e);
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                if write.send(Message::Pong(payload)).await.is_err() {
                                    warn!("Failed to answer ping on {} stream", symbol);
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) => {
                                info!("Upstream closed the {} stream", symbol);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("Upstream receive error on {} stream: {}", symbol, e);
                                break;
                            }
                            None => {
                                info!("Upstream {} stream ended", symbol);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Closing upstream connection for {}", symbol);
                        let close = Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "shutdown".into(),
                        }));
                        if let Err(e) = write.send(close).await {
                            debug!("Failed to send close frame for {}: {}", symbol, e);
                        }
                        break;
                    }
                }
            }

            alive.store(false, Ordering::SeqCst);

            let mut map = connections.write();
            if map.get(&symbol).map(|h| h.generation) == Some(generation) {
                map.remove(&symbol);
            }
        });

        Ok(())
    }

    /// Periodically reconnect symbols whose connection is absent or dead
    fn spawn_supervisor(
        &self,
        tick_tx: mpsc::Sender<TradeEvent>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> tokio::task::JoinHandle<()> {
        let feed = self.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(Duration::from_secs(feed.config.supervisor_initial_delay_secs)) => {}
                _ = shutdown_rx.recv() => {
                    feed.connections.write().clear();
                    return;
                }
            }

            let mut ticker = interval(Duration::from_secs(feed.config.supervisor_interval_secs));

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        metrics::UPSTREAM_LIVE_CONNECTIONS.set(feed.live_connections() as i64);
                        for symbol in &feed.symbols {
                            let live = feed
                                .connections
                                .read()
                                .get(symbol)
                                .map(|h| h.alive.load(Ordering::SeqCst))
                                .unwrap_or(false);

                            if !live {
                                warn!("Upstream connection for {} is down, reconnecting", symbol);
                                metrics::UPSTREAM_RECONNECTS_TOTAL.inc();
                                if let Err(e) = feed
                                    .connect(symbol, tick_tx.clone(), shutdown_tx.subscribe())
                                    .await
                                {
                                    error!("Reconnect failed for {}: {}", symbol, e);
                                }
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Feed supervisor stopped");
                        break;
                    }
                }
            }

            feed.connections.write().clear();
        })
    }
}

/// Forward one tick into the processing channel.
///
/// The send only blocks when the channel is full, which keeps per-symbol
/// ordering intact under backpressure instead of reordering ticks.
async fn forward_tick(tick_tx: &mpsc::Sender<TradeEvent>, trade: TradeEvent) {
    match tick_tx.try_send(trade) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(trade)) => {
            warn!(
                "Tick channel full, waiting for capacity (symbol: {})",
                trade.symbol
            );
            if let Err(e) = tick_tx.send(trade).await {
                debug!("Tick channel closed while forwarding: {}", e);
            }
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Tick channel closed, dropping tick");
        }
    }
}

/// Parse an inbound frame into a validated trade event
fn parse_agg_trade(text: &str) -> Result<TradeEvent, FeedError> {
    match serde_json::from_str::<TradeEvent>(text) {
        Ok(trade) => {
            trade
                .validate()
                .map_err(|e| FeedError::Parse(e.to_string()))?;
            Ok(trade)
        }
        Err(err) => {
            // Subscription acknowledgements and similar control payloads
            // carry "result"/"id" members instead of trade fields
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
                if value.get("result").is_some() || value.get("id").is_some() {
                    return Err(FeedError::ControlMessage);
                }
            }
            Err(FeedError::Parse(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn parses_agg_trade_frame() {
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
            "m": false,
            "M": true
        }"#;

        let trade = parse_agg_trade(frame).unwrap();
        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.trade_id, 26129);
        assert_eq!(trade.price, Decimal::from_str("50000.00").unwrap());
        assert_eq!(trade.quantity, Decimal::from_str("0.001").unwrap());
        assert!(!trade.is_buyer_maker);
    }

    #[test]
    fn recognizes_control_messages() {
        let result = parse_agg_trade(r#"{"result": null, "id": 1}"#);
        assert!(matches!(result, Err(FeedError::ControlMessage)));
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(
            parse_agg_trade("not json"),
            Err(FeedError::Parse(_))
        ));
        assert!(matches!(
            parse_agg_trade(r#"{"e": "depthUpdate"}"#),
            Err(FeedError::Parse(_))
        ));
    }

    #[test]
    fn rejects_invalid_trade_values() {
        let frame = r#"{
            "a": 1,
            "p": "0",
            "q": "1.0",
            "T": 1672515782136,
            "m": false,
            "s": "BTCUSDT"
        }"#;

        assert!(matches!(parse_agg_trade(frame), Err(FeedError::Parse(_))));
    }

    #[tokio::test]
    async fn forward_tick_preserves_order() {
        let (tx, mut rx) = mpsc::channel(10);

        for id in 1..=5u64 {
            let trade = TradeEvent::new(
                id,
                Decimal::from(100),
                Decimal::ONE,
                id as i64,
                false,
                "BTCUSDT".to_string(),
            );
            forward_tick(&tx, trade).await;
        }

        for expected in 1..=5u64 {
            let trade = rx.recv().await.unwrap();
            assert_eq!(trade.trade_id, expected);
        }
    }
}
