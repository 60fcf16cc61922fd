//! Peer datagram wire format (spec §3, §6)
//!
//! Packed, multi-byte fields little-endian on the wire. Laid out with
//! `bytemuck` so encode/decode is a straight reinterpret-cast rather than
//! hand-rolled byte shuffling, the way the pack's other UWB/packet types
//! do it.
//!
//! The six leading `u8` fields plus three trailing `u32` fields sum to 18
//! bytes, matching the byte-offset table in spec §6 (`data` starts at
//! offset 14 and is 4 bytes wide, ending at 18); the "16 bytes" summary in
//! spec §3 undercounts it. The offset table is the more detailed and more
//! normative of the two, so this codec follows it and `DATAGRAM_LEN` is
//! derived from the struct rather than hardcoded.

use bytemuck::{Pod, Zeroable};

/// Datagram payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DatagramType {
    Shot = 0,
    HitEvent = 1,
    Heartbeat = 2,
}

impl DatagramType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Shot),
            1 => Some(Self::HitEvent),
            2 => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// Current wire version. Bump if the layout changes.
pub const PROTOCOL_VERSION: u8 = 1;

/// The 16-byte peer-bus packet exchanged between endpoints.
///
/// `timestamp_ms` doubles as a rolling 32-bit send sequence per spec §4.D;
/// see `peer::table` for the wrap-safe dedup comparison.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PeerDatagram {
    pub kind: u8,
    pub version: u8,
    pub player_id: u8,
    pub device_id: u8,
    pub team_id: u8,
    pub reserved: u8,
    pub color_rgb: u32,
    pub timestamp_ms: u32,
    pub data: u32,
}

pub const DATAGRAM_LEN: usize = std::mem::size_of::<PeerDatagram>();

impl PeerDatagram {
    pub fn new(
        kind: DatagramType,
        player_id: u8,
        device_id: u8,
        team_id: u8,
        color_rgb: u32,
        seq: u32,
        data: u32,
    ) -> Self {
        Self {
            kind: kind as u8,
            version: PROTOCOL_VERSION,
            player_id,
            device_id,
            team_id,
            reserved: 0,
            color_rgb,
            timestamp_ms: seq,
            data,
        }
    }

    pub fn kind(&self) -> Option<DatagramType> {
        DatagramType::from_u8(self.kind)
    }

    /// Serialize to the 16-byte wire form (little-endian multi-byte fields).
    pub fn to_bytes(&self) -> [u8; DATAGRAM_LEN] {
        bytemuck::bytes_of(self).try_into().expect("fixed-size packed struct")
    }

    /// Parse a wire datagram. Returns `None` if the slice isn't exactly
    /// `DATAGRAM_LEN` bytes (spec §7 `InvalidFrame`: wrong-size datagram).
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != DATAGRAM_LEN {
            return None;
        }
        let mut buf = [0u8; DATAGRAM_LEN];
        buf.copy_from_slice(bytes);
        Some(*bytemuck::from_bytes(&buf))
    }
}

/// All-ones MAC used as the broadcast address (spec §4.D).
pub const BROADCAST_MAC: [u8; 6] = [0xFF; 6];

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn wire_length_matches_offset_table() {
        // six u8 fields + three u32 fields, per the spec §6 offset table
        assert_eq!(DATAGRAM_LEN, 6 + 3 * 4);
    }

    #[test]
    fn wrong_size_is_rejected() {
        assert!(PeerDatagram::from_bytes(&[0u8; 15]).is_none());
        assert!(PeerDatagram::from_bytes(&[0u8; 17]).is_none());
    }

    proptest! {
        #[test]
        fn round_trip(
            player_id in 0u8..=255,
            device_id in 0u8..=255,
            team_id in 0u8..=255,
            color in any::<u32>(),
            seq in any::<u32>(),
            data in any::<u32>(),
        ) {
            let dgram = PeerDatagram::new(DatagramType::Shot, player_id, device_id, team_id, color, seq, data);
            let bytes = dgram.to_bytes();
            let parsed = PeerDatagram::from_bytes(&bytes).unwrap();
            prop_assert_eq!(parsed, dgram);
        }
    }
}
