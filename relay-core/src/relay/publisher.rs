use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use super::errors::{RelayError, RelayResult};
use super::{analysis_channel, trade_channel};
use crate::config::PublisherSettings;
use crate::metrics;
use relay_common::data::types::{AnalysisSnapshot, TradeEvent};

/// Transport seam for bus publication.
///
/// Returns the number of receivers the bus delivered the payload to.
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> RelayResult<u64>;
}

/// Redis PUBLISH transport
pub struct RedisBusTransport {
    connection: MultiplexedConnection,
}

impl RedisBusTransport {
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl BusTransport for RedisBusTransport {
    async fn publish(&self, channel: &str, payload: &str) -> RelayResult<u64> {
        let mut conn = self.connection.clone();
        let receivers: u64 = conn.publish(channel, payload).await?;
        Ok(receivers)
    }
}

/// Publishes ticks and analysis snapshots onto the bus.
///
/// Payloads are serialized once, size-guarded, and published with a bounded
/// number of attempts and linearly increasing backoff. Exhausted publishes
/// are reported to the caller but are expected to be logged and dropped
/// there; the relay never blocks indefinitely on a failing bus.
pub struct TradePublisher {
    transport: Arc<dyn BusTransport>,
    config: PublisherSettings,
}

impl TradePublisher {
    pub fn new(transport: Arc<dyn BusTransport>, config: PublisherSettings) -> Self {
        Self { transport, config }
    }

    /// Publish a raw trade event onto the symbol's trade channel
    pub async fn publish_trade(&self, symbol: &str, trade: &TradeEvent) -> RelayResult<()> {
        let payload = serde_json::to_string(trade)?;
        self.publish_with_retry(&trade_channel(symbol), &payload)
            .await
    }

    /// Publish an analysis snapshot onto the symbol's analysis channel
    pub async fn publish_analysis(
        &self,
        symbol: &str,
        snapshot: &AnalysisSnapshot,
    ) -> RelayResult<()> {
        let payload = serde_json::to_string(snapshot)?;
        self.publish_with_retry(&analysis_channel(symbol), &payload)
            .await
    }

    async fn publish_with_retry(&self, channel: &str, payload: &str) -> RelayResult<()> {
        if payload.len() > self.config.max_message_bytes {
            warn!(
                "Rejecting oversized message for {}: {} bytes (limit {})",
                channel,
                payload.len(),
                self.config.max_message_bytes
            );
            return Err(RelayError::MessageTooLarge {
                size: payload.len(),
                limit: self.config.max_message_bytes,
            });
        }

        for attempt in 1..=self.config.max_attempts {
            match self.transport.publish(channel, payload).await {
                Ok(0) => {
                    // Nobody subscribed yet; the publish still succeeded
                    debug!("No subscribers on channel {}", channel);
                    return Ok(());
                }
                Ok(receivers) => {
                    debug!("Published to {} ({} receivers)", channel, receivers);
                    return Ok(());
                }
                Err(e) => {
                    metrics::BUS_PUBLISH_RETRIES_TOTAL.inc();
                    warn!(
                        "Publish to {} failed (attempt {}/{}): {}",
                        channel, attempt, self.config.max_attempts, e
                    );
                    if attempt < self.config.max_attempts {
                        sleep(Duration::from_millis(
                            self.config.retry_delay_ms * attempt as u64,
                        ))
                        .await;
                    }
                }
            }
        }

        metrics::BUS_PUBLISH_FAILURES_TOTAL.inc();
        error!(
            "Publish to {} failed after {} attempts, dropping message",
            channel, self.config.max_attempts
        );
        Err(RelayError::RetriesExhausted {
            channel: channel.to_string(),
            attempts: self.config.max_attempts,
        })
    }
}
