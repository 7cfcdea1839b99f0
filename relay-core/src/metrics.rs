// metrics.rs - Prometheus metrics for relay monitoring

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Upstream Feed Metrics
    // ============================================================================

    /// Total number of ticks received from the upstream feed
    pub static ref TICKS_RECEIVED_TOTAL: IntCounter = IntCounter::new(
        "relay_ticks_received_total",
        "Total number of ticks received from the upstream feed"
    ).expect("Failed to create ticks_received_total metric");

    /// Total number of inbound frames dropped due to parse failures
    pub static ref TICK_PARSE_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "relay_tick_parse_failures_total",
        "Total number of inbound frames dropped due to parse failures"
    ).expect("Failed to create tick_parse_failures_total metric");

    /// Total upstream WebSocket connection attempts
    pub static ref UPSTREAM_CONNECTIONS_TOTAL: IntCounter = IntCounter::new(
        "relay_upstream_connections_total",
        "Total number of upstream WebSocket connection attempts"
    ).expect("Failed to create upstream_connections_total metric");

    /// Total upstream reconnections initiated by the supervisor
    pub static ref UPSTREAM_RECONNECTS_TOTAL: IntCounter = IntCounter::new(
        "relay_upstream_reconnects_total",
        "Total number of upstream reconnections initiated by the supervisor"
    ).expect("Failed to create upstream_reconnects_total metric");

    /// Current number of upstream connections observed live
    pub static ref UPSTREAM_LIVE_CONNECTIONS: IntGauge = IntGauge::new(
        "relay_upstream_live_connections",
        "Current number of upstream connections observed live"
    ).expect("Failed to create upstream_live_connections metric");

    // ============================================================================
    // Bus Metrics
    // ============================================================================

    /// Total messages received from the bus subscription
    pub static ref BUS_MESSAGES_RECEIVED_TOTAL: IntCounter = IntCounter::new(
        "relay_bus_messages_received_total",
        "Total number of messages received from the bus subscription"
    ).expect("Failed to create bus_messages_received_total metric");

    /// Total publish retry attempts
    pub static ref BUS_PUBLISH_RETRIES_TOTAL: IntCounter = IntCounter::new(
        "relay_bus_publish_retries_total",
        "Total number of bus publish retry attempts"
    ).expect("Failed to create bus_publish_retries_total metric");

    /// Total publishes dropped after exhausting all attempts
    pub static ref BUS_PUBLISH_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "relay_bus_publish_failures_total",
        "Total number of publishes dropped after exhausting all attempts"
    ).expect("Failed to create bus_publish_failures_total metric");

    /// Total analysis snapshots published
    pub static ref SNAPSHOTS_PUBLISHED_TOTAL: IntCounter = IntCounter::new(
        "relay_snapshots_published_total",
        "Total number of analysis snapshots published"
    ).expect("Failed to create snapshots_published_total metric");

    // ============================================================================
    // Downstream Session Metrics
    // ============================================================================

    /// Current number of open downstream sessions
    pub static ref ACTIVE_SESSIONS: IntGauge = IntGauge::new(
        "relay_active_sessions",
        "Current number of open downstream sessions"
    ).expect("Failed to create active_sessions metric");

    /// Total downstream sessions opened
    pub static ref SESSIONS_OPENED_TOTAL: IntCounter = IntCounter::new(
        "relay_sessions_opened_total",
        "Total number of downstream sessions opened"
    ).expect("Failed to create sessions_opened_total metric");

    /// Total sessions removed by the periodic sweep
    pub static ref SESSIONS_SWEPT_TOTAL: IntCounter = IntCounter::new(
        "relay_sessions_swept_total",
        "Total number of sessions removed by the periodic sweep"
    ).expect("Failed to create sessions_swept_total metric");

    /// Total broadcast sends that failed and removed a session
    pub static ref BROADCAST_SEND_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "relay_broadcast_send_failures_total",
        "Total number of broadcast sends that failed and removed a session"
    ).expect("Failed to create broadcast_send_failures_total metric");
}

/// Register all metrics with the global registry
pub fn register_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Upstream feed metrics
    REGISTRY.register(Box::new(TICKS_RECEIVED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TICK_PARSE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UPSTREAM_CONNECTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UPSTREAM_RECONNECTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UPSTREAM_LIVE_CONNECTIONS.clone()))?;

    // Bus metrics
    REGISTRY.register(Box::new(BUS_MESSAGES_RECEIVED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BUS_PUBLISH_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BUS_PUBLISH_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SNAPSHOTS_PUBLISHED_TOTAL.clone()))?;

    // Downstream session metrics
    REGISTRY.register(Box::new(ACTIVE_SESSIONS.clone()))?;
    REGISTRY.register(Box::new(SESSIONS_OPENED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SESSIONS_SWEPT_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BROADCAST_SEND_FAILURES_TOTAL.clone()))?;

    Ok(())
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    use hyper::{
        service::{make_service_fn, service_fn},
        Body, Method, Request, Response, Server, StatusCode,
    };
    use prometheus::{Encoder, TextEncoder};
    use std::net::SocketAddr;

    async fn serve_metrics(_req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
        let encoder = TextEncoder::new();
        let metric_families = REGISTRY.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            eprintln!("Failed to encode metrics: {}", e);
            return Ok(Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("Failed to encode metrics"))
                .unwrap());
        }

        Ok(Response::new(Body::from(buffer)))
    }

    async fn handle_request(req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
        match (req.method(), req.uri().path()) {
            (&Method::GET, "/metrics") => serve_metrics(req).await,
            (&Method::GET, "/health") => Ok(Response::new(Body::from("OK"))),
            _ => Ok(Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Body::from("Not Found"))
                .unwrap()),
        }
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc =
        make_service_fn(|_conn| async { Ok::<_, hyper::Error>(service_fn(handle_request)) });

    let server = Server::bind(&addr).serve(make_svc);

    tracing::info!(
        "Prometheus metrics server listening on http://{}/metrics",
        addr
    );

    server.await?;

    Ok(())
}
