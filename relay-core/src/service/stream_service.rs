use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{error, info, warn};

use super::errors::{ServiceError, ServiceResult};
use crate::analysis::AnalysisEngine;
use crate::config::ServerSettings;
use crate::feed::BinanceAggTradeFeed;
use crate::metrics;
use crate::relay::TradeSubscriber;
use crate::server::{DownstreamServer, SessionRegistry};
use relay_common::data::types::TradeEvent;

/// Coordinates the full relay pipeline: upstream feed, analysis engine,
/// bus subscription, downstream fanout and the periodic jobs.
pub struct StreamService {
    symbols: Vec<String>,
    feed: BinanceAggTradeFeed,
    engine: Arc<AnalysisEngine>,
    subscriber: Arc<TradeSubscriber>,
    registry: Arc<SessionRegistry>,
    server: DownstreamServer,
    server_settings: ServerSettings,
    redis_client: redis::Client,
    shutdown_tx: broadcast::Sender<()>,
}

impl StreamService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbols: Vec<String>,
        feed: BinanceAggTradeFeed,
        engine: Arc<AnalysisEngine>,
        subscriber: Arc<TradeSubscriber>,
        registry: Arc<SessionRegistry>,
        server: DownstreamServer,
        server_settings: ServerSettings,
        redis_client: redis::Client,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            symbols,
            feed,
            engine,
            subscriber,
            registry,
            server,
            server_settings,
            redis_client,
            shutdown_tx,
        }
    }

    pub fn get_shutdown_tx(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Start every component and wait until shutdown
    pub async fn start(&self) -> ServiceResult<()> {
        if self.symbols.is_empty() {
            return Err(ServiceError::Configuration(
                "No symbols configured".to_string(),
            ));
        }

        info!("Starting trade stream relay for symbols: {:?}", self.symbols);

        // Tick pipeline between the upstream read loops and the engine,
        // sized for burst traffic across symbols
        const CHANNEL_CAPACITY: usize = 10_000;
        let (tick_tx, tick_rx) = mpsc::channel::<TradeEvent>(CHANNEL_CAPACITY);

        let mut handles = Vec::new();

        handles.push(self.feed.start(tick_tx, self.shutdown_tx.clone()).await);
        handles.push(self.start_tick_processing(tick_rx));
        handles.extend(
            self.engine
                .spawn_scheduled_jobs(self.symbols.clone(), &self.shutdown_tx),
        );
        handles.push(self.start_subscriber());
        handles.push(self.start_downstream_server());
        handles.push(self.start_session_sweep());

        let results = join_all(handles).await;
        for result in results {
            result.map_err(|e| ServiceError::Task(format!("Task failed: {}", e)))?;
        }

        info!("Trade stream relay stopped normally");
        Ok(())
    }

    /// Drain the tick channel into the analysis engine
    fn start_tick_processing(
        &self,
        mut tick_rx: mpsc::Receiver<TradeEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    tick = tick_rx.recv() => {
                        match tick {
                            Some(trade) => {
                                metrics::TICKS_RECEIVED_TOTAL.inc();
                                engine.on_trade(&trade).await;
                            }
                            None => {
                                warn!("Tick channel closed");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Tick processing stopped");
                        break;
                    }
                }
            }
        })
    }

    fn start_subscriber(&self) -> tokio::task::JoinHandle<()> {
        let subscriber = Arc::clone(&self.subscriber);
        let client = self.redis_client.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = subscriber.run(client, shutdown_rx).await {
                error!("Subscribe relay terminated: {}", e);
            }
        })
    }

    fn start_downstream_server(&self) -> tokio::task::JoinHandle<()> {
        let server = self.server.clone();
        let shutdown_tx = self.shutdown_tx.clone();

        tokio::spawn(async move {
            if let Err(e) = server.run(shutdown_tx).await {
                error!("Downstream server terminated: {}", e);
            }
        })
    }

    /// Periodically remove sessions whose close event was missed
    fn start_session_sweep(&self) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let sweep_interval = Duration::from_secs(self.server_settings.sweep_interval_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.sweep();
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Session sweep stopped");
                        break;
                    }
                }
            }
        })
    }
}
