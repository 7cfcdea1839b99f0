//! Downstream WebSocket endpoint.
//!
//! Accepts persistent connections at a fixed path with an optional `symbol`
//! query parameter used as the session's symbol filter. Each connection gets
//! one writer task that drains the session's outbound queue; the registry
//! delivers broadcasts into that queue.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::session::SessionRegistry;
use super::ServerError;
use crate::config::ServerSettings;

/// WebSocket server for downstream subscribers
#[derive(Clone)]
pub struct DownstreamServer {
    config: ServerSettings,
    registry: Arc<SessionRegistry>,
}

impl DownstreamServer {
    pub fn new(config: ServerSettings, registry: Arc<SessionRegistry>) -> Self {
        Self { config, registry }
    }

    /// Accept downstream connections until shutdown is signalled
    pub async fn run(&self, shutdown_tx: broadcast::Sender<()>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(
            "Downstream WebSocket server listening on {}{}",
            self.config.bind_addr, self.config.path
        );

        let mut shutdown_rx = shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            debug!("Downstream client connecting from {}", peer_addr);
                            let registry = Arc::clone(&self.registry);
                            let path = self.config.path.clone();
                            let buffer = self.config.session_buffer;

                            tokio::spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, registry, &path, buffer).await
                                {
                                    debug!("Downstream connection {} ended: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            warn!("Failed to accept downstream connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Downstream server stopped");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: Arc<SessionRegistry>,
    path: &str,
    buffer: usize,
) -> Result<(), String> {
    let mut query: Option<String> = None;

    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
        if req.uri().path() != path {
            let mut not_found = ErrorResponse::new(Some("not found".to_string()));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            return Err(not_found);
        }
        query = req.uri().query().map(str::to_string);
        Ok(resp)
    })
    .await
    .map_err(|e| format!("WebSocket handshake failed: {}", e))?;

    let symbol_filter = symbol_filter_from_query(query.as_deref());
    let (mut write, mut read) = ws_stream.split();

    let (tx, mut rx) = mpsc::channel::<String>(buffer);
    let session_id = registry.register(symbol_filter, tx);

    // Single writer task per session; ends when the registry entry is
    // removed and the last sender drops
    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if write.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    // Downstream clients do not drive any protocol; inbound frames are
    // logged and dropped
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                debug!("Inbound message from session {}: {}", session_id, text);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Receive error on session {}: {}", session_id, e);
                break;
            }
        }
    }

    registry.unregister(session_id);
    let _ = writer.await;

    Ok(())
}

/// Extract the session's symbol filter from the request query string
pub fn symbol_filter_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == "symbol" && !value.is_empty() {
            Some(value.to_string())
        } else {
            None
        }
    })
}
