use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::errors::RelayResult;
use super::{ANALYSIS_CHANNEL_PREFIX, TRADE_CHANNEL_PREFIX};
use crate::metrics;
use crate::server::SessionRegistry;
use relay_common::data::types::TradeEvent;

/// Consumes the bus channels and demultiplexes messages into the fanout
/// layer by channel-name prefix.
///
/// Every per-message failure is logged and isolated; nothing a single
/// message does can terminate the subscription loop.
pub struct TradeSubscriber {
    registry: Arc<SessionRegistry>,
    messages_received: AtomicU64,
}

impl TradeSubscriber {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            messages_received: AtomicU64::new(0),
        }
    }

    /// Total bus messages received since startup
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Subscribe to the bus and dispatch messages until shutdown
    pub async fn run(
        &self,
        client: redis::Client,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> RelayResult<()> {
        let mut pubsub = client.get_async_connection().await?.into_pubsub();
        pubsub
            .psubscribe(format!("{}*", TRADE_CHANNEL_PREFIX))
            .await?;
        pubsub
            .psubscribe(format!("{}*", ANALYSIS_CHANNEL_PREFIX))
            .await?;

        info!(
            "Subscribed to bus channels {}* and {}*",
            TRADE_CHANNEL_PREFIX, ANALYSIS_CHANNEL_PREFIX
        );

        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                msg = stream.next() => {
                    match msg {
                        Some(msg) => {
                            let channel = msg.get_channel_name().to_string();
                            match msg.get_payload::<String>() {
                                Ok(body) => self.handle_message(&channel, &body),
                                Err(e) => {
                                    warn!("Failed to read bus message body on {}: {}", channel, e);
                                }
                            }
                        }
                        None => {
                            warn!("Bus subscription stream ended");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Subscribe relay stopped");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Dispatch one inbound bus message by channel-name prefix
    pub fn handle_message(&self, channel: &str, body: &str) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        metrics::BUS_MESSAGES_RECEIVED_TOTAL.inc();

        if let Some(symbol) = channel.strip_prefix(TRADE_CHANNEL_PREFIX) {
            if body.trim_start().starts_with('{') {
                match serde_json::from_str::<TradeEvent>(body) {
                    Ok(trade) => self.registry.broadcast_trade(symbol, &trade),
                    Err(e) => warn!("Malformed trade message on {}: {}", channel, e),
                }
            } else {
                warn!("Trade channel message is not a JSON object: {}", channel);
            }
        } else if channel.strip_prefix(ANALYSIS_CHANNEL_PREFIX).is_some() {
            self.registry.broadcast_all(body);
        } else {
            warn!("Message on unrecognized channel: {}", channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn subscriber_with_sessions() -> (
        TradeSubscriber,
        mpsc::Receiver<String>,
        mpsc::Receiver<String>,
        mpsc::Receiver<String>,
    ) {
        let registry = Arc::new(SessionRegistry::new());
        let (btc_tx, btc_rx) = mpsc::channel(16);
        let (eth_tx, eth_rx) = mpsc::channel(16);
        let (all_tx, all_rx) = mpsc::channel(16);
        registry.register(Some("btcusdt".to_string()), btc_tx);
        registry.register(Some("ethusdt".to_string()), eth_tx);
        registry.register(None, all_tx);

        (TradeSubscriber::new(registry), btc_rx, eth_rx, all_rx)
    }

    const TRADE_BODY: &str = r#"{"a":1,"p":"50000","q":"1.0","T":1672515782136,"m":false,"s":"BTCUSDT"}"#;

    #[test]
    fn trade_messages_route_to_symbol_sessions() {
        let (subscriber, mut btc_rx, mut eth_rx, mut all_rx) = subscriber_with_sessions();

        subscriber.handle_message("trade:btcusdt", TRADE_BODY);

        let delivered = btc_rx.try_recv().unwrap();
        let parsed: TradeEvent = serde_json::from_str(&delivered).unwrap();
        assert_eq!(parsed.symbol, "BTCUSDT");
        assert!(eth_rx.try_recv().is_err());
        assert!(all_rx.try_recv().is_err());
    }

    #[test]
    fn analysis_messages_broadcast_to_all_sessions() {
        let (subscriber, mut btc_rx, mut eth_rx, mut all_rx) = subscriber_with_sessions();

        subscriber.handle_message("analysis:btcusdt", r#"{"symbol":"BTCUSDT"}"#);

        assert!(btc_rx.try_recv().is_ok());
        assert!(eth_rx.try_recv().is_ok());
        assert!(all_rx.try_recv().is_ok());
    }

    #[test]
    fn malformed_trade_bodies_are_dropped() {
        let (subscriber, mut btc_rx, _, _) = subscriber_with_sessions();

        subscriber.handle_message("trade:btcusdt", "not json");
        subscriber.handle_message("trade:btcusdt", r#"{"bad": "shape"}"#);

        assert!(btc_rx.try_recv().is_err());
        assert_eq!(subscriber.messages_received(), 2);
    }

    #[test]
    fn unrecognized_channels_are_dropped() {
        let (subscriber, mut btc_rx, mut eth_rx, mut all_rx) = subscriber_with_sessions();

        subscriber.handle_message("orders:btcusdt", TRADE_BODY);

        assert!(btc_rx.try_recv().is_err());
        assert!(eth_rx.try_recv().is_err());
        assert!(all_rx.try_recv().is_err());
        assert_eq!(subscriber.messages_received(), 1);
    }

    #[test]
    fn message_counter_is_monotonic() {
        let (subscriber, ..) = subscriber_with_sessions();

        assert_eq!(subscriber.messages_received(), 0);
        subscriber.handle_message("trade:btcusdt", TRADE_BODY);
        subscriber.handle_message("analysis:btcusdt", "{}");
        assert_eq!(subscriber.messages_received(), 2);
    }
}
