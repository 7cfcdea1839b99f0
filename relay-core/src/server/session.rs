use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::metrics;
use relay_common::data::types::TradeEvent;

/// One live downstream connection.
///
/// The registry observes open-ness through the outbound channel rather than
/// tracking it separately; the writer task holding the receiving end is the
/// source of truth.
struct SessionHandle {
    session_id: u64,
    /// Optional symbol filter. Symbol-scoped broadcasts compare it exactly
    /// (case-sensitive) against the channel-derived lower-cased symbol;
    /// sessions without a filter receive broadcast-to-all traffic only.
    symbol_filter: Option<String>,
    sender: mpsc::Sender<String>,
}

impl SessionHandle {
    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Registry of live downstream sessions with per-symbol fanout.
///
/// Fanout dispatches onto each session's bounded outbound queue; the single
/// writer task per connection drains it. Broadcasts therefore never spawn
/// work per message, and a slow or dead session cannot stall delivery to
/// the others.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u64, SessionHandle>>,
    next_session_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Add a new open session and return its id. Session ids are unique for
    /// the lifetime of the process and never reused.
    pub fn register(&self, symbol_filter: Option<String>, sender: mpsc::Sender<String>) -> u64 {
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        self.sessions.write().insert(
            session_id,
            SessionHandle {
                session_id,
                symbol_filter: symbol_filter.clone(),
                sender,
            },
        );

        metrics::SESSIONS_OPENED_TOTAL.inc();
        metrics::ACTIVE_SESSIONS.set(self.active_count() as i64);
        info!(
            "Session {} connected (symbol filter: {:?})",
            session_id, symbol_filter
        );
        session_id
    }

    /// Remove a session. Calling with an unknown id is a no-op.
    pub fn unregister(&self, session_id: u64) {
        if self.sessions.write().remove(&session_id).is_some() {
            info!("Session {} closed", session_id);
        }
        metrics::ACTIVE_SESSIONS.set(self.active_count() as i64);
    }

    /// Count of sessions currently observed open. A point-in-time estimate
    /// under concurrent connects and disconnects.
    pub fn active_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_open())
            .count()
    }

    /// Send a payload to every open session regardless of filter
    pub fn broadcast_all(&self, payload: &str) {
        self.dispatch(payload, None);
    }

    /// Send a payload to sessions whose filter equals the symbol
    pub fn broadcast_to_symbol(&self, symbol: &str, payload: &str) {
        self.dispatch(payload, Some(symbol));
    }

    /// Serialize a trade once and fan it out to the symbol's sessions
    pub fn broadcast_trade(&self, symbol: &str, trade: &TradeEvent) {
        match serde_json::to_string(trade) {
            Ok(json) => self.broadcast_to_symbol(symbol, &json),
            Err(e) => error!("Failed to serialize trade for fanout: {}", e),
        }
    }

    /// Remove every session observed closed. Backstop for sessions whose
    /// close event was missed.
    pub fn sweep(&self) -> usize {
        let removed = {
            let mut sessions = self.sessions.write();
            let before = sessions.len();
            sessions.retain(|_, session| session.is_open());
            before - sessions.len()
        };

        if removed > 0 {
            metrics::SESSIONS_SWEPT_TOTAL.inc_by(removed as u64);
            info!("Sweep removed {} closed sessions", removed);
        }
        metrics::ACTIVE_SESSIONS.set(self.active_count() as i64);
        removed
    }

    fn dispatch(&self, payload: &str, symbol: Option<&str>) {
        // Snapshot the matching senders under the read lock, then send
        // without holding it so concurrent removals cannot corrupt the map.
        let targets: Vec<(u64, mpsc::Sender<String>)> = {
            let sessions = self.sessions.read();
            sessions
                .values()
                .filter(|session| match symbol {
                    Some(sym) => session.symbol_filter.as_deref() == Some(sym),
                    None => true,
                })
                .map(|session| (session.session_id, session.sender.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (session_id, sender) in targets {
            if sender.try_send(payload.to_string()).is_err() {
                dead.push(session_id);
            } else {
                debug!("Queued payload for session {}", session_id);
            }
        }

        for session_id in dead {
            metrics::BROADCAST_SEND_FAILURES_TOTAL.inc();
            warn!("Dropping session {}: send failed", session_id);
            self.unregister(session_id);
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(
        registry: &SessionRegistry,
        filter: Option<&str>,
    ) -> (u64, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        let id = registry.register(filter.map(str::to_string), tx);
        (id, rx)
    }

    #[test]
    fn symbol_broadcast_reaches_matching_sessions_only() {
        let registry = SessionRegistry::new();
        let (_, mut btc_rx) = session(&registry, Some("btcusdt"));
        let (_, mut eth_rx) = session(&registry, Some("ethusdt"));
        let (_, mut all_rx) = session(&registry, None);

        registry.broadcast_to_symbol("btcusdt", "tick");

        assert_eq!(btc_rx.try_recv().unwrap(), "tick");
        assert!(eth_rx.try_recv().is_err());
        assert!(all_rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_all_ignores_filters() {
        let registry = SessionRegistry::new();
        let (_, mut btc_rx) = session(&registry, Some("btcusdt"));
        let (_, mut all_rx) = session(&registry, None);

        registry.broadcast_all("snapshot");

        assert_eq!(btc_rx.try_recv().unwrap(), "snapshot");
        assert_eq!(all_rx.try_recv().unwrap(), "snapshot");
    }

    #[test]
    fn filter_match_is_exact() {
        let registry = SessionRegistry::new();
        let (_, mut upper_rx) = session(&registry, Some("BTCUSDT"));

        registry.broadcast_to_symbol("btcusdt", "tick");
        assert!(upper_rx.try_recv().is_err());
    }

    #[test]
    fn failed_send_removes_the_session() {
        let registry = SessionRegistry::new();
        let (_, rx) = session(&registry, Some("btcusdt"));
        let (_, mut live_rx) = session(&registry, Some("btcusdt"));
        drop(rx);

        registry.broadcast_to_symbol("btcusdt", "tick");

        // Delivery to the live session is unaffected
        assert_eq!(live_rx.try_recv().unwrap(), "tick");
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn sweep_removes_closed_sessions() {
        let registry = SessionRegistry::new();
        let (_, rx) = session(&registry, None);
        let (_, _live_rx) = session(&registry, None);

        assert_eq!(registry.active_count(), 2);
        drop(rx);

        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.sweep(), 1);
        assert_eq!(registry.sweep(), 0);
    }

    #[test]
    fn unregister_is_idempotent_and_ids_are_unique() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = session(&registry, None);
        let (second, _rx2) = session(&registry, None);
        assert_ne!(first, second);

        registry.unregister(first);
        registry.unregister(first);
        assert_eq!(registry.active_count(), 1);

        // A later registration never reuses a removed id
        let (third, _rx3) = session(&registry, None);
        assert_ne!(third, first);
    }

    #[test]
    fn broadcast_trade_serializes_wire_format() {
        use rust_decimal::Decimal;

        let registry = SessionRegistry::new();
        let (_, mut rx) = session(&registry, Some("btcusdt"));

        let trade = TradeEvent::new(
            7,
            Decimal::from(50_000),
            Decimal::ONE,
            1672515782136,
            false,
            "BTCUSDT".to_string(),
        );
        registry.broadcast_trade("btcusdt", &trade);

        let payload = rx.try_recv().unwrap();
        let parsed: TradeEvent = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed, trade);
    }
}
