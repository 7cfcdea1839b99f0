use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay_core::analysis::{AnalysisConfig, AnalysisEngine};
use relay_core::config::Settings;
use relay_core::feed::BinanceAggTradeFeed;
use relay_core::metrics;
use relay_core::relay::{RedisBusTransport, TradePublisher, TradeSubscriber};
use relay_core::server::{DownstreamServer, SessionRegistry};
use relay_core::service::{ServiceError, StreamService};
use relay_common::data::store::{RedisTradeStore, TradeWindowStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    info!("Starting trade stream relay");

    // Load configuration
    let settings = Settings::new()?;
    settings.validate()?;

    info!("Configuration loaded successfully");
    info!("Monitoring symbols: {:?}", settings.symbols);
    info!(
        "Rolling window: {} trades/{}s TTL | analysis every {}s | daily reset {:02}:{:02} {}",
        settings.analysis.window_capacity,
        settings.analysis.window_ttl_secs,
        settings.analysis.interval_secs,
        settings.analysis.day_start_hour,
        settings.analysis.day_start_minute,
        settings.analysis.timezone
    );

    // Connect to Redis (bus and rolling-window store)
    info!("Connecting to Redis...");
    let redis_client = redis::Client::open(settings.redis.url.as_str())?;
    let connection = redis_client.get_multiplexed_tokio_connection().await?;
    test_redis_connection(&connection).await?;
    info!("Redis connection established");

    // Metrics
    metrics::register_metrics()?;
    if settings.metrics.enabled {
        let port = settings.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(port).await {
                error!("Metrics server terminated: {}", e);
            }
        });
    }

    // Build components
    let store: Arc<dyn TradeWindowStore> = Arc::new(RedisTradeStore::new(
        connection.clone(),
        settings.analysis.window_capacity,
        settings.analysis.window_ttl_secs,
    ));
    let transport = Arc::new(RedisBusTransport::new(connection));
    let publisher = Arc::new(TradePublisher::new(transport, settings.publisher.clone()));

    let analysis_config = AnalysisConfig::from_settings(&settings.analysis)
        .map_err(|e| ServiceError::Configuration(format!("Invalid analysis thresholds: {}", e)))?;
    let engine = Arc::new(AnalysisEngine::new(store, publisher, analysis_config));

    let registry = Arc::new(SessionRegistry::new());
    let subscriber = Arc::new(TradeSubscriber::new(Arc::clone(&registry)));
    let feed = BinanceAggTradeFeed::new(settings.feed.clone(), settings.symbols.clone());
    let server = DownstreamServer::new(settings.server.clone(), Arc::clone(&registry));

    let service = StreamService::new(
        settings.symbols.clone(),
        feed,
        engine,
        subscriber,
        registry,
        server,
        settings.server.clone(),
        redis_client,
    );

    // Forward Ctrl+C to the service shutdown channel
    let shutdown_tx = service.get_shutdown_tx();
    tokio::spawn(async move {
        signal::ctrl_c().await.expect("Failed to listen for ctrl-c");
        info!("Received Ctrl+C signal, shutting down");
        let _ = shutdown_tx.send(());
    });

    match service.start().await {
        Ok(()) => {
            info!("Service stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Service stopped with error: {}", e);
            Err(Box::new(e))
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    // Default to info level if RUST_LOG is not set
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("relay_core=info,relay_common=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();

    Ok(())
}

/// Test Redis connectivity before wiring up the pipeline
async fn test_redis_connection(
    connection: &redis::aio::MultiplexedConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = connection.clone();
    let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
    if pong != "PONG" {
        warn!("Unexpected PING response from Redis: {}", pong);
    }
    Ok(())
}
