//! ==============================================================================
//! packet.rs - wire codecs for the sensor nodes
//! ==============================================================================
//!
//! purpose:
//!     decodes the fixed 16-byte telemetry datagram sent by every node once per
//!     measurement cycle, and parses the line-oriented FAULT reports the nodes
//!     push on the control port.
//!
//! wire layout (host byte order, no padding):
//!
//!     ┌───────────┬───────────┬───────────┬───────────┐
//!     │ node_id   │ cycle_id  │ vrms      │ irms      │
//!     │ u32       │ u32       │ f32       │ f32       │
//!     └───────────┴───────────┴───────────┴───────────┘
//!
//! relationships:
//!     - used by: ingest.rs (udp data loop, fault listener)
//!     - produces: domain::NodeSample
//!
//! ==============================================================================

use thiserror::Error;

use crate::domain::{NodeSample, NUM_NODES};

/// exact size of one telemetry datagram
pub const PACKET_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("malformed packet: expected {expected} bytes, got {len}", expected = PACKET_LEN)]
    MalformedPacket { len: usize },
    #[error("malformed packet: node id {0} outside 1..={max}", max = NUM_NODES)]
    NodeOutOfRange(u32),
}

/// decode one datagram; no partial decoding, the caller drops the whole buffer on error
pub fn decode(buf: &[u8]) -> Result<NodeSample, PacketError> {
    let bytes: &[u8; PACKET_LEN] = buf
        .try_into()
        .map_err(|_| PacketError::MalformedPacket { len: buf.len() })?;

    let word = |i: usize| u32::from_ne_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

    let node_id = word(0);
    if node_id == 0 || node_id as usize > NUM_NODES {
        return Err(PacketError::NodeOutOfRange(node_id));
    }

    Ok(NodeSample {
        node_id,
        cycle_id: word(4),
        vrms: f32::from_bits(word(8)),
        irms: f32::from_bits(word(12)),
    })
}

/// encode a sample the way the node firmware does (used by simulators and tests)
pub fn encode(sample: &NodeSample) -> [u8; PACKET_LEN] {
    let mut out = [0u8; PACKET_LEN];
    out[0..4].copy_from_slice(&sample.node_id.to_ne_bytes());
    out[4..8].copy_from_slice(&sample.cycle_id.to_ne_bytes());
    out[8..12].copy_from_slice(&sample.vrms.to_ne_bytes());
    out[12..16].copy_from_slice(&sample.irms.to_ne_bytes());
    out
}

// ==============================================================================
// fault event text protocol
// ==============================================================================
// nodes report locally detected faults as `FAULT|<node_id>|<type>`.
// parsing is permissive: anything that does not fit is ignored, never an error.

/// maximum length of the fault type token
const FAULT_TYPE_MAX: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultReport {
    pub node_id: u32,
    pub kind: String,
}

pub fn parse_fault_line(line: &str) -> Option<FaultReport> {
    let rest = line.strip_prefix("FAULT|")?;
    let mut fields = rest.splitn(2, '|');

    let node_id = fields.next()?.trim().parse::<u32>().ok()?;

    let kind: String = fields
        .next()?
        .split('|')
        .next()?
        .trim_end()
        .chars()
        .take(FAULT_TYPE_MAX)
        .collect();
    if kind.is_empty() {
        return None;
    }

    Some(FaultReport { node_id, kind })
}
