//! WebSocket server core (spec §4.F)
//!
//! A fixed 8-slot client table behind its own lock, separate from the
//! game-state lock. Every send is non-blocking (`try_send` on a bounded
//! per-client queue); a full queue drops the frame and leaves
//! `last_activity_ms` untouched. `broadcast` snapshots the active set
//! under the lock, then sends outside it (spec §9 "broadcast inside
//! mutex" fix).
//!
//! Grounded on `ws/handler.rs`'s split sink/writer-task pattern, restyled
//! around a fixed-capacity table instead of the teacher's per-match
//! `broadcast::Sender` (the spec needs per-client drop-on-full and stale
//! eviction, which a broadcast channel can't express per-subscriber).

use std::net::SocketAddr;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use crate::ws::protocol::Outbound;

pub const MAX_CLIENTS: usize = 8;
const SEND_QUEUE_CAPACITY: usize = 32;
/// Fallback used by `Default`/`new_with_default_timeout`; overridable via
/// `Config::ws_stale_timeout_ms` (spec.md default 30_000).
pub const DEFAULT_STALE_TIMEOUT_MS: u32 = 30_000;

/// A WS session handle. The admin protocol has no client-chosen session
/// id, so the peer address of the upgraded connection stands in for it.
pub type ClientHandle = SocketAddr;

struct ClientRow {
    handle: ClientHandle,
    tx: mpsc::Sender<String>,
    last_activity_ms: u32,
}

pub struct WsServer {
    clients: Mutex<Vec<ClientRow>>,
    stale_timeout_ms: u32,
}

impl Default for WsServer {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_TIMEOUT_MS)
    }
}

impl WsServer {
    /// `stale_timeout_ms` is `Config::ws_stale_timeout_ms` in production
    /// (spec §4.F); tests pass whatever fits the scenario.
    pub fn new(stale_timeout_ms: u32) -> Self {
        Self { clients: Mutex::new(Vec::with_capacity(MAX_CLIENTS)), stale_timeout_ms }
    }

    /// Handshake (spec §4.F): evict any stale row first, then evict a row
    /// for the same handle if re-handshaking, then occupy a free slot.
    /// Returns `None` (and logs) if the table is full.
    pub fn register(&self, handle: ClientHandle, now_ms: u32) -> Option<mpsc::Receiver<String>> {
        let mut clients = self.clients.lock();
        clients.retain(|c| now_ms.wrapping_sub(c.last_activity_ms) <= self.stale_timeout_ms);
        clients.retain(|c| c.handle != handle);

        if clients.len() >= MAX_CLIENTS {
            warn!(%handle, "WS client table full, refusing handshake");
            return None;
        }

        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        clients.push(ClientRow { handle, tx, last_activity_ms: now_ms });
        Some(rx)
    }

    pub fn remove(&self, handle: ClientHandle) {
        self.clients.lock().retain(|c| c.handle != handle);
    }

    pub fn touch(&self, handle: ClientHandle, now_ms: u32) {
        if let Some(row) = self.clients.lock().iter_mut().find(|c| c.handle == handle) {
            row.last_activity_ms = now_ms;
        }
    }

    pub fn count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Drop clients silent for more than `stale_timeout_ms`. Returns the
    /// evicted handles so the caller can emit a `disconnect` notification
    /// per handle.
    pub fn evict_stale(&self, now_ms: u32) -> Vec<ClientHandle> {
        let mut clients = self.clients.lock();
        let (keep, evicted): (Vec<_>, Vec<_>) = std::mem::take(&mut *clients)
            .into_iter()
            .partition(|c| now_ms.wrapping_sub(c.last_activity_ms) <= self.stale_timeout_ms);
        *clients = keep;
        evicted.into_iter().map(|c| c.handle).collect()
    }

    /// Send to one client only (spec §4.G op 1 `get_status`). Non-blocking;
    /// a full queue silently drops the frame.
    pub fn send_to(&self, handle: ClientHandle, frame: &Outbound) -> bool {
        let tx = self.clients.lock().iter().find(|c| c.handle == handle).map(|c| c.tx.clone());
        match tx {
            Some(tx) => tx.try_send(frame.to_json_string()).is_ok(),
            None => false,
        }
    }

    /// Fan out to every connected client. Snapshots the sender handles
    /// under the lock, then sends outside it.
    pub fn broadcast(&self, frame: &Outbound) {
        let senders: Vec<mpsc::Sender<String>> = self.clients.lock().iter().map(|c| c.tx.clone()).collect();
        let json = frame.to_json_string();
        for tx in senders {
            let _ = tx.try_send(json.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn rehandshake_of_same_handle_replaces_row() {
        let server = WsServer::new(DEFAULT_STALE_TIMEOUT_MS);
        server.register(addr(1), 0).unwrap();
        server.register(addr(1), 100).unwrap();
        assert_eq!(server.count(), 1);
    }

    #[test]
    fn table_refuses_beyond_max_clients() {
        let server = WsServer::new(DEFAULT_STALE_TIMEOUT_MS);
        for i in 0..MAX_CLIENTS as u16 {
            assert!(server.register(addr(i), 0).is_some());
        }
        assert!(server.register(addr(99), 0).is_none());
    }

    #[test]
    fn stale_clients_are_evicted_on_handshake() {
        let server = WsServer::new(DEFAULT_STALE_TIMEOUT_MS);
        server.register(addr(1), 0).unwrap();
        // a fresh handshake at t=30_001 should find slot 1 stale and reusable
        for i in 0..MAX_CLIENTS as u16 {
            assert!(server.register(addr(i + 10), 30_001).is_some());
        }
        assert_eq!(server.count(), MAX_CLIENTS);
    }

    #[test]
    fn full_queue_drops_frame_without_blocking() {
        let server = WsServer::new(DEFAULT_STALE_TIMEOUT_MS);
        let mut rx = server.register(addr(1), 0).unwrap();
        for _ in 0..SEND_QUEUE_CAPACITY {
            assert!(server.send_to(addr(1), &Outbound::GameOver));
        }
        assert!(!server.send_to(addr(1), &Outbound::GameOver)); // queue full, dropped
        rx.close();
    }

    #[test]
    fn evict_stale_returns_evicted_handles() {
        let server = WsServer::new(DEFAULT_STALE_TIMEOUT_MS);
        server.register(addr(1), 0).unwrap();
        server.register(addr(2), 30_000).unwrap();
        let evicted = server.evict_stale(30_001);
        assert_eq!(evicted, vec![addr(1)]);
        assert_eq!(server.count(), 1);
    }
}
