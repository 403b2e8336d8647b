// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Wire formats: the 24-byte TCP `LabelHeader` (spec.md §6) and the UDP
// multicast discovery frame (spec.md §4.9, §6). Grounded on
// examples/original_source/eROIL/src/socket/socket_header.h for the field
// layout and examples/original_source/eROIL/src/net/win/win_socket_udpm.cpp
// for the multicast snapshot shape.

use crate::error::ConnError;

pub const MAGIC: u32 = 0x4C4F_5245; // "EROL"
pub const WIRE_VERSION: u16 = 1;
pub const SOCKET_DATA_MAX_SIZE: u32 = 1024 * 1024;

pub const FLAG_DATA: u16 = 1;
pub const FLAG_CONNECT: u16 = 2;
pub const FLAG_DISCONNECT: u16 = 4;
pub const FLAG_PING: u16 = 8;

/// Fixed 24-byte TCP frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelHeader {
    pub magic: u32,
    pub version: u16,
    pub source_id: i32,
    pub flags: u16,
    pub label: i32,
    pub data_size: u32,
    pub recv_offset: u32,
}

pub const LABEL_HEADER_LEN: usize = 24;

impl LabelHeader {
    pub fn new(source_id: i32, flags: u16, label: i32, data_size: u32, recv_offset: u32) -> Self {
        Self {
            magic: MAGIC,
            version: WIRE_VERSION,
            source_id,
            flags,
            label,
            data_size,
            recv_offset,
        }
    }

    pub fn connect(source_id: i32) -> Self {
        Self::new(source_id, FLAG_CONNECT, -1, 0, 0)
    }

    pub fn ping(source_id: i32) -> Self {
        Self::new(source_id, FLAG_PING, -1, 0, 0)
    }

    pub fn data(source_id: i32, label: i32, data_size: u32, recv_offset: u32) -> Self {
        Self::new(source_id, FLAG_DATA, label, data_size, recv_offset)
    }

    pub fn encode(&self) -> [u8; LABEL_HEADER_LEN] {
        let mut buf = [0u8; LABEL_HEADER_LEN];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..10].copy_from_slice(&self.source_id.to_le_bytes());
        buf[10..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..16].copy_from_slice(&self.label.to_le_bytes());
        buf[16..20].copy_from_slice(&self.data_size.to_le_bytes());
        buf[20..24].copy_from_slice(&self.recv_offset.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; LABEL_HEADER_LEN]) -> Result<Self, ConnError> {
        let hdr = Self {
            magic: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            version: u16::from_le_bytes(buf[4..6].try_into().unwrap()),
            source_id: i32::from_le_bytes(buf[6..10].try_into().unwrap()),
            flags: u16::from_le_bytes(buf[10..12].try_into().unwrap()),
            label: i32::from_le_bytes(buf[12..16].try_into().unwrap()),
            data_size: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            recv_offset: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
        };
        if hdr.magic != MAGIC {
            return Err(ConnError::BadFrame("bad magic"));
        }
        if hdr.version != WIRE_VERSION {
            return Err(ConnError::BadFrame("unsupported version"));
        }
        if hdr.data_size > SOCKET_DATA_MAX_SIZE {
            return Err(ConnError::BadFrame("data_size out of range"));
        }
        if hdr.flags & (FLAG_DATA | FLAG_PING | FLAG_CONNECT | FLAG_DISCONNECT) == 0 {
            return Err(ConnError::BadFrame("unknown flag set"));
        }
        Ok(hdr)
    }
}

/// Discovery frame contents (spec.md §4.9/§6). `LabelInfo` entries are
/// padded to `MAX_LABELS` with the sentinel label `-1`.
pub const MAX_LABELS: usize = 200;
pub const DISCOVERY_GROUP: &str = "239.255.0.1";
pub const DISCOVERY_PORT: u16 = 30001;
pub const DISCOVERY_TTL: u32 = 1;
pub const LABEL_SENTINEL: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelInfo {
    pub label: i32,
    pub size: u32,
}

impl LabelInfo {
    pub const INVALID: LabelInfo = LabelInfo {
        label: LABEL_SENTINEL,
        size: 0,
    };
}

#[derive(Debug, Clone)]
pub struct LabelSnapshot {
    pub generation: u64,
    pub labels: Vec<LabelInfo>, // sorted ascending by label, len <= MAX_LABELS
}

impl LabelSnapshot {
    pub fn empty() -> Self {
        Self {
            generation: 0,
            labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    pub node_id: i32,
    pub send_snapshot: LabelSnapshot,
    pub recv_snapshot: LabelSnapshot,
}

impl BroadcastMessage {
    /// Encode into the fixed-size UDP payload: node_id, then each snapshot
    /// as generation + MAX_LABELS fixed-width entries (sentinel-padded).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 2 * (8 + MAX_LABELS * 8));
        buf.extend_from_slice(&self.node_id.to_le_bytes());
        Self::encode_snapshot(&self.send_snapshot, &mut buf);
        Self::encode_snapshot(&self.recv_snapshot, &mut buf);
        buf
    }

    fn encode_snapshot(snap: &LabelSnapshot, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&snap.generation.to_le_bytes());
        for i in 0..MAX_LABELS {
            let info = snap.labels.get(i).copied().unwrap_or(LabelInfo::INVALID);
            buf.extend_from_slice(&info.label.to_le_bytes());
            buf.extend_from_slice(&info.size.to_le_bytes());
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ConnError> {
        const SNAP_LEN: usize = 8 + MAX_LABELS * 8;
        const TOTAL: usize = 4 + 2 * SNAP_LEN;
        if buf.len() < TOTAL {
            return Err(ConnError::BadFrame("discovery frame too short"));
        }
        let node_id = i32::from_le_bytes(buf[0..4].try_into().unwrap());
        let send_snapshot = Self::decode_snapshot(&buf[4..4 + SNAP_LEN]);
        let recv_snapshot = Self::decode_snapshot(&buf[4 + SNAP_LEN..4 + 2 * SNAP_LEN]);
        Ok(Self {
            node_id,
            send_snapshot,
            recv_snapshot,
        })
    }

    fn decode_snapshot(buf: &[u8]) -> LabelSnapshot {
        let generation = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let mut labels = Vec::new();
        for i in 0..MAX_LABELS {
            let off = 8 + i * 8;
            let label = i32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
            let size = u32::from_le_bytes(buf[off + 4..off + 8].try_into().unwrap());
            if label != LABEL_SENTINEL {
                labels.push(LabelInfo { label, size });
            }
        }
        LabelSnapshot { generation, labels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_header_roundtrip() {
        let h = LabelHeader::data(3, 100, 42, 7);
        let decoded = LabelHeader::decode(&h.encode()).unwrap();
        assert_eq!(h, decoded);
    }

    #[test]
    fn label_header_rejects_bad_magic() {
        let mut buf = LabelHeader::ping(1).encode();
        buf[0] ^= 0xFF;
        assert!(LabelHeader::decode(&buf).is_err());
    }

    #[test]
    fn broadcast_message_roundtrip() {
        let msg = BroadcastMessage {
            node_id: 2,
            send_snapshot: LabelSnapshot {
                generation: 5,
                labels: vec![LabelInfo { label: 10, size: 4 }, LabelInfo { label: 20, size: 8 }],
            },
            recv_snapshot: LabelSnapshot::empty(),
        };
        let encoded = msg.encode();
        let decoded = BroadcastMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.node_id, 2);
        assert_eq!(decoded.send_snapshot.generation, 5);
        assert_eq!(decoded.send_snapshot.labels.len(), 2);
        assert!(decoded.recv_snapshot.labels.is_empty());
    }
}
