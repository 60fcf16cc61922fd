//! Peer event bus (spec §4.D)
//!
//! Fixed-size datagram exchange between endpoints sharing one radio
//! channel. The actual radio is a named external collaborator (spec §1);
//! this module depends only on the `RadioLink` trait so tests and the
//! supervisor's channel-locking logic don't need real hardware.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use crate::codec::peer::{PeerDatagram, BROADCAST_MAC};
use crate::error::{CoreError, CoreResult};
use crate::peer::table::{Mac, PeerTable};

/// Minimal radio transport the peer bus is built on. A real endpoint
/// backs this with its co-located radio driver (out of scope, spec §1);
/// tests back it with an in-process loopback.
pub trait RadioLink: Send + Sync {
    fn send_to(&self, mac: Mac, bytes: &[u8]) -> bool;
    /// Non-blocking poll for one inbound raw datagram, if the driver has
    /// one buffered. `None` means nothing waiting right now, not an error.
    fn recv(&self) -> Option<(Vec<u8>, Mac)>;
    fn current_channel(&self) -> u8;
    fn set_channel(&self, channel: u8);
}

/// How long `send`/`broadcast` will wait to acquire the send mutex before
/// giving up and dropping the frame (spec §4.D: "50 ms acquire budget").
const SEND_LOCK_BUDGET: Duration = Duration::from_millis(50);

/// Bounded peer RX queue capacity; oldest entry is dropped on overflow.
const DEFAULT_RX_CAPACITY: usize = 16;

struct RxEntry {
    datagram: PeerDatagram,
    src_mac: Mac,
}

pub struct PeerBus {
    link: Box<dyn RadioLink>,
    table: PeerTable,
    send_lock: Mutex<()>,
    rx_queue: Mutex<VecDeque<RxEntry>>,
    rx_capacity: usize,
    rx_notify: Notify,
    tx_count: std::sync::atomic::AtomicU32,
}

impl PeerBus {
    pub fn new(link: Box<dyn RadioLink>, rx_capacity: usize) -> Self {
        Self {
            link,
            table: PeerTable::new(),
            send_lock: Mutex::new(()),
            rx_queue: Mutex::new(VecDeque::with_capacity(rx_capacity)),
            rx_capacity: rx_capacity.max(1),
            rx_notify: Notify::new(),
            tx_count: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn with_default_capacity(link: Box<dyn RadioLink>) -> Self {
        Self::new(link, DEFAULT_RX_CAPACITY)
    }

    /// Idempotent init. `channel = 0` keeps the current channel; otherwise
    /// the peer bus channel is locked to match it (spec: shared radio with
    /// the station AP channel).
    pub fn init(&self, channel: u8) {
        if channel != 0 {
            self.link.set_channel(channel);
        }
    }

    pub fn set_channel(&self, channel: u8) {
        self.link.set_channel(channel);
    }

    pub fn current_channel(&self) -> u8 {
        self.link.current_channel()
    }

    pub fn add_peer(&self, mac: Mac, now_ms: u32) {
        self.table.add(mac, now_ms);
    }

    pub fn clear_peers(&self) {
        self.table.clear();
    }

    pub fn peer_count(&self) -> u8 {
        self.table.count()
    }

    pub fn load_peers_from_csv(&self, csv: &str, now_ms: u32) -> Result<(), String> {
        self.table.load_from_csv(csv, now_ms)
    }

    /// Send to a single peer. Best-effort; no ARQ, no ordering guarantee.
    /// On lock-acquire timeout the frame is dropped and `tx_count` is not
    /// incremented (spec §4.D).
    pub fn send(&self, mac: Mac, datagram: &PeerDatagram) -> bool {
        let Some(_guard) = try_lock_with_budget(&self.send_lock) else {
            warn!("peer send lock timed out, dropping frame");
            return false;
        };
        let ok = self.link.send_to(mac, &datagram.to_bytes());
        if ok {
            self.tx_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        ok
    }

    pub fn broadcast(&self, datagram: &PeerDatagram) -> bool {
        self.send(BROADCAST_MAC, datagram)
    }

    pub fn tx_count(&self) -> u32 {
        self.tx_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Called by the radio I/O task when a raw datagram arrives. Applies
    /// dedup by rolling sequence before queuing; duplicates are silently
    /// discarded (spec §4.D) and never reach `receive`.
    pub fn on_datagram_received(&self, bytes: &[u8], src_mac: Mac, now_ms: u32) -> CoreResult<()> {
        let datagram = PeerDatagram::from_bytes(bytes)
            .ok_or_else(|| CoreError::InvalidFrame(format!("peer datagram wrong size: {} bytes", bytes.len())))?;

        if !self.table.accept_seq(src_mac, datagram.timestamp_ms, now_ms) {
            return Ok(()); // duplicate, silently discarded
        }

        let mut queue = self.rx_queue.lock();
        if queue.len() >= self.rx_capacity {
            queue.pop_front(); // drop oldest on overflow
        }
        queue.push_back(RxEntry { datagram, src_mac });
        drop(queue);
        self.rx_notify.notify_one();
        Ok(())
    }

    /// Drain one queued datagram, waiting up to `timeout` if the queue is
    /// empty.
    pub async fn receive(&self, timeout: Duration) -> Option<(PeerDatagram, Mac)> {
        if let Some(entry) = self.rx_queue.lock().pop_front() {
            return Some((entry.datagram, entry.src_mac));
        }
        tokio::time::timeout(timeout, self.rx_notify.notified()).await.ok()?;
        self.rx_queue.lock().pop_front().map(|e| (e.datagram, e.src_mac))
    }

    pub fn evict_stale_peers(&self, now_ms: u32) {
        self.table.evict_stale(now_ms);
    }

    /// Poll the radio link once and, if a frame was waiting, validate and
    /// enqueue it via `on_datagram_received`. Called by the radio I/O task
    /// (spec §5) on a fixed cadence since `RadioLink::recv` is non-blocking.
    pub fn poll_radio(&self, now_ms: u32) {
        if let Some((bytes, src_mac)) = self.link.recv() {
            if let Err(e) = self.on_datagram_received(&bytes, src_mac, now_ms) {
                warn!(error = %e, "dropping malformed peer datagram");
            }
        }
    }

    /// Non-blocking drain of one already-queued datagram.
    pub fn try_recv(&self) -> Option<(PeerDatagram, Mac)> {
        self.rx_queue.lock().pop_front().map(|e| (e.datagram, e.src_mac))
    }
}

fn try_lock_with_budget<'a, T>(lock: &'a Mutex<T>) -> Option<parking_lot::MutexGuard<'a, T>> {
    lock.try_lock_for(SEND_LOCK_BUDGET)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::peer::DatagramType;
    use std::sync::atomic::{AtomicU8, Ordering};

    struct LoopbackLink {
        channel: AtomicU8,
    }

    impl RadioLink for LoopbackLink {
        fn send_to(&self, _mac: Mac, _bytes: &[u8]) -> bool {
            true
        }
        fn recv(&self) -> Option<(Vec<u8>, Mac)> {
            None
        }
        fn current_channel(&self) -> u8 {
            self.channel.load(Ordering::Relaxed)
        }
        fn set_channel(&self, channel: u8) {
            self.channel.store(channel, Ordering::Relaxed);
        }
    }

    struct OneShotLink {
        frame: Mutex<Option<(Vec<u8>, Mac)>>,
    }

    impl RadioLink for OneShotLink {
        fn send_to(&self, _mac: Mac, _bytes: &[u8]) -> bool {
            true
        }
        fn recv(&self) -> Option<(Vec<u8>, Mac)> {
            self.frame.lock().take()
        }
        fn current_channel(&self) -> u8 {
            1
        }
        fn set_channel(&self, _channel: u8) {}
    }

    fn bus() -> PeerBus {
        PeerBus::with_default_capacity(Box::new(LoopbackLink { channel: AtomicU8::new(1) }))
    }

    #[test]
    fn init_with_zero_keeps_current_channel() {
        let b = bus();
        b.init(0);
        assert_eq!(b.current_channel(), 1);
        b.init(6);
        assert_eq!(b.current_channel(), 6);
    }

    #[test]
    fn send_increments_tx_count_only_on_success() {
        let b = bus();
        let dgram = PeerDatagram::new(DatagramType::Shot, 1, 1, 0, 0, 0, 0);
        assert!(b.send([1, 2, 3, 4, 5, 6], &dgram));
        assert_eq!(b.tx_count(), 1);
    }

    #[test]
    fn rx_queue_drops_oldest_on_overflow() {
        let b = PeerBus::new(Box::new(LoopbackLink { channel: AtomicU8::new(1) }), 2);
        let mac = [1, 1, 1, 1, 1, 1];
        for seq in 0..4u32 {
            let dgram = PeerDatagram::new(DatagramType::Shot, 1, 1, 0, 0, seq, 0);
            b.on_datagram_received(&dgram.to_bytes(), mac, 1000 + seq).unwrap();
        }
        // capacity 2: only seq 2 and 3 should remain
        let mut seen = Vec::new();
        while let Some(entry) = b.rx_queue.lock().pop_front() {
            seen.push(entry.datagram.timestamp_ms);
        }
        assert_eq!(seen, vec![2, 3]);
    }

    #[test]
    fn duplicate_datagrams_never_reach_the_queue() {
        let b = bus();
        let mac = [2, 2, 2, 2, 2, 2];
        let dgram = PeerDatagram::new(DatagramType::Shot, 1, 1, 0, 0, 5, 0);
        b.on_datagram_received(&dgram.to_bytes(), mac, 1000).unwrap();
        b.on_datagram_received(&dgram.to_bytes(), mac, 1001).unwrap();
        assert_eq!(b.rx_queue.lock().len(), 1);
    }

    #[tokio::test]
    async fn receive_times_out_on_empty_queue() {
        let b = bus();
        let result = b.receive(Duration::from_millis(10)).await;
        assert!(result.is_none());
    }

    #[test]
    fn poll_radio_enqueues_a_waiting_frame_for_try_recv() {
        let mac = [3, 3, 3, 3, 3, 3];
        let dgram = PeerDatagram::new(DatagramType::Shot, 1, 1, 0, 0, 1, 0);
        let link = OneShotLink { frame: Mutex::new(Some((dgram.to_bytes().to_vec(), mac))) };
        let b = PeerBus::with_default_capacity(Box::new(link));

        assert!(b.try_recv().is_none());
        b.poll_radio(1000);
        let (got, src) = b.try_recv().expect("frame enqueued by poll_radio");
        assert_eq!(src, mac);
        let timestamp_ms = got.timestamp_ms;
        assert_eq!(timestamp_ms, 1);

        // link now has nothing buffered; a second poll is a no-op
        b.poll_radio(1001);
        assert!(b.try_recv().is_none());
    }
}
