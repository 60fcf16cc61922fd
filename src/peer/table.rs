//! Peer table (spec §3 "PeerTableEntry", §4.D)
//!
//! Tracks one row per known peer MAC: last-seen time (for staleness) and
//! the last accepted rolling sequence (for dedup). Backed by `DashMap` the
//! way the teacher's `MatchRegistry` backs its handle table.

use dashmap::DashMap;

pub type Mac = [u8; 6];

const STALE_TIMEOUT_MS: u32 = 30_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct PeerTableEntry {
    pub last_seen_ms: u32,
    pub last_seq_rx: u32,
}

/// Wrap-safe "is `seq` newer than `last_seq_rx`" per spec §4.D.
fn is_newer(seq: u32, last_seq_rx: u32) -> bool {
    (seq.wrapping_sub(last_seq_rx) as i32) > 0
}

#[derive(Default)]
pub struct PeerTable {
    entries: DashMap<Mac, PeerTableEntry>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer explicitly (spec `add_peer`), or touch it if already known.
    pub fn add(&self, mac: Mac, now_ms: u32) {
        self.entries.entry(mac).or_insert(PeerTableEntry { last_seen_ms: now_ms, last_seq_rx: 0 });
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn count(&self) -> u8 {
        self.entries.len() as u8
    }

    /// Record an inbound datagram's sequence. Returns `true` if it was
    /// accepted (new peer, or `seq` newer than the last one seen); `false`
    /// if it's a duplicate/out-of-order frame to be silently discarded.
    pub fn accept_seq(&self, mac: Mac, seq: u32, now_ms: u32) -> bool {
        let is_new_peer = !self.entries.contains_key(&mac);
        let mut entry = self.entries.entry(mac).or_insert(PeerTableEntry { last_seen_ms: now_ms, last_seq_rx: seq });
        if is_new_peer || is_newer(seq, entry.last_seq_rx) {
            entry.last_seen_ms = now_ms;
            entry.last_seq_rx = seq;
            true
        } else {
            false
        }
    }

    pub fn find(&self, mac: &Mac) -> Option<PeerTableEntry> {
        self.entries.get(mac).map(|e| *e)
    }

    /// Drop entries that haven't been heard from in `STALE_TIMEOUT_MS`.
    pub fn evict_stale(&self, now_ms: u32) {
        self.entries.retain(|_, e| now_ms.wrapping_sub(e.last_seen_ms) <= STALE_TIMEOUT_MS);
    }

    /// Parse a `"aa:bb:cc:dd:ee:ff"`-unit CSV (`,` or `;` separated), adding
    /// every valid MAC. Returns `Ok(())` if at least one was added, per
    /// spec `load_peers_from_csv`.
    pub fn load_from_csv(&self, csv: &str, now_ms: u32) -> Result<(), String> {
        let mut added = 0usize;
        for unit in csv.split([',', ';']) {
            let unit = unit.trim();
            if unit.is_empty() {
                continue;
            }
            if let Some(mac) = parse_mac(unit) {
                self.add(mac, now_ms);
                added += 1;
            }
        }
        if added > 0 {
            Ok(())
        } else {
            Err("no valid MAC addresses found".to_string())
        }
    }
}

fn parse_mac(s: &str) -> Option<Mac> {
    let mut mac = [0u8; 6];
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return None;
    }
    for (i, part) in parts.iter().enumerate() {
        mac[i] = u8::from_str_radix(part, 16).ok()?;
    }
    Some(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_sequence_is_rejected() {
        let table = PeerTable::new();
        let mac = [1, 2, 3, 4, 5, 6];
        assert!(table.accept_seq(mac, 10, 1000));
        assert!(!table.accept_seq(mac, 10, 1001));
        assert!(!table.accept_seq(mac, 5, 1002));
        assert!(table.accept_seq(mac, 11, 1003));
    }

    #[test]
    fn sequence_dedup_is_wrap_safe() {
        let table = PeerTable::new();
        let mac = [9, 9, 9, 9, 9, 9];
        assert!(table.accept_seq(mac, u32::MAX - 1, 1000));
        assert!(table.accept_seq(mac, 1, 1001)); // wrapped forward
        assert!(!table.accept_seq(mac, u32::MAX - 1, 1002)); // stale, wrapped backward
    }

    #[test]
    fn csv_parses_comma_and_semicolon_separated() {
        let table = PeerTable::new();
        table.load_from_csv("aa:bb:cc:dd:ee:ff,11:22:33:44:55:66;77:88:99:aa:bb:cc", 0).unwrap();
        assert_eq!(table.count(), 3);
    }

    #[test]
    fn csv_with_no_valid_macs_errors() {
        let table = PeerTable::new();
        assert!(table.load_from_csv("not-a-mac", 0).is_err());
    }

    #[test]
    fn stale_entries_are_evicted() {
        let table = PeerTable::new();
        let mac = [1, 1, 1, 1, 1, 1];
        table.add(mac, 0);
        table.evict_stale(30_001);
        assert_eq!(table.count(), 0);
    }
}
