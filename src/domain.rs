//! ==============================================================================
//! domain.rs - shared data model for both processes
//! ==============================================================================
//!
//! purpose:
//!     the records that flow through the pipeline:
//!     NodeSample (wire) -> CombinedSnapshot (ipc) -> results (analysis).
//!     every per-node field is a fixed-size array indexed 0..NUM_NODES.
//!
//! relationships:
//!     - produced by: packet.rs (NodeSample), merger.rs (CombinedSnapshot)
//!     - consumed by: ipc.rs, state.rs, voltage.rs, current.rs, indicator.rs, eventlog.rs
//!
//! ==============================================================================

use serde::Serialize;

/// number of remote sensor nodes; node ids on the wire are 1..=NUM_NODES
pub const NUM_NODES: usize = 3;

/// crest factor of a sinusoid
pub const PEAK_FACTOR: f32 = std::f32::consts::SQRT_2;

/// get current timestamp in milliseconds (unix epoch)
pub fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==============================================================================
// wire sample
// ==============================================================================

/// one measurement cycle reported by a remote node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSample {
    /// 1-based node identifier
    pub node_id: u32,
    /// per-node monotonic measurement counter
    pub cycle_id: u32,
    /// RMS voltage (V)
    pub vrms: f32,
    /// RMS current (A)
    pub irms: f32,
}

impl NodeSample {
    /// zero-based slot in the per-node arrays, None when the id is outside 1..=NUM_NODES
    pub fn index(&self) -> Option<usize> {
        match self.node_id as usize {
            id @ 1..=NUM_NODES => Some(id - 1),
            _ => None,
        }
    }
}

// ==============================================================================
// combined snapshot (the ipc record)
// ==============================================================================

/// latest known values for every node, as handed across the process boundary
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CombinedSnapshot {
    pub cycle_id: [u32; NUM_NODES],
    pub vrms: [f32; NUM_NODES],
    pub irms: [f32; NUM_NODES],
    pub active: [bool; NUM_NODES],
}

impl CombinedSnapshot {
    /// size of the fixed record in shared memory: four 32-bit arrays
    pub const WIRE_LEN: usize = 4 * 4 * NUM_NODES;

    /// serialise into the fixed shared-memory layout (host byte order)
    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        let words = self
            .cycle_id
            .iter()
            .copied()
            .chain(self.vrms.iter().map(|v| v.to_bits()))
            .chain(self.irms.iter().map(|v| v.to_bits()))
            .chain(self.active.iter().map(|&a| u32::from(a)));
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_ne_bytes());
        }
        out
    }

    /// inverse of `to_bytes`
    pub fn from_bytes(bytes: &[u8; Self::WIRE_LEN]) -> Self {
        let mut words = [0u32; 4 * NUM_NODES];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        let mut snapshot = Self::default();
        for n in 0..NUM_NODES {
            snapshot.cycle_id[n] = words[n];
            snapshot.vrms[n] = f32::from_bits(words[NUM_NODES + n]);
            snapshot.irms[n] = f32::from_bits(words[2 * NUM_NODES + n]);
            snapshot.active[n] = words[3 * NUM_NODES + n] != 0;
        }
        snapshot
    }
}

// ==============================================================================
// fault classification
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoltageStatus {
    #[default]
    Normal,
    Sag,
    Swell,
}

impl VoltageStatus {
    /// integer code written to the CSV log
    pub fn code(self) -> u8 {
        match self {
            VoltageStatus::Normal => 0,
            VoltageStatus::Sag => 1,
            VoltageStatus::Swell => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VoltageStatus::Normal => "NORMAL",
            VoltageStatus::Sag => "SAG",
            VoltageStatus::Swell => "SWELL",
        }
    }

    pub fn is_fault(self) -> bool {
        self != VoltageStatus::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CurrentStatus {
    #[default]
    Normal,
    Overcurrent,
}

impl CurrentStatus {
    pub fn code(self) -> u8 {
        match self {
            CurrentStatus::Normal => 0,
            CurrentStatus::Overcurrent => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CurrentStatus::Normal => "NORMAL",
            CurrentStatus::Overcurrent => "OVERCURRENT",
        }
    }

    pub fn is_fault(self) -> bool {
        self != CurrentStatus::Normal
    }
}

// ==============================================================================
// derived results
// ==============================================================================

/// voltage analysis output, recomputed wholesale every analyzer tick
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct VoltageResult {
    pub rms: [f32; NUM_NODES],
    pub peak: [f32; NUM_NODES],
    pub status: [VoltageStatus; NUM_NODES],
    /// processing timestamp (ms), 0 until the analyzer has run once
    pub timestamp: u64,
}

/// current analysis output, recomputed wholesale every analyzer tick
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CurrentResult {
    pub rms: [f32; NUM_NODES],
    pub peak: [f32; NUM_NODES],
    pub status: [CurrentStatus; NUM_NODES],
    pub timestamp: u64,
}

/// apparent power per node (vrms * irms)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PowerResult {
    pub watts: [f32; NUM_NODES],
    /// true once both analyzers have published at least one result
    pub is_valid: bool,
    pub timestamp: u64,
}

impl PowerResult {
    pub fn from_results(voltage: &VoltageResult, current: &CurrentResult) -> Self {
        let mut watts = [0.0; NUM_NODES];
        for (n, w) in watts.iter_mut().enumerate() {
            *w = voltage.rms[n] * current.rms[n];
        }
        Self {
            watts,
            is_valid: voltage.timestamp != 0 && current.timestamp != 0,
            timestamp: voltage.timestamp.max(current.timestamp),
        }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_layout_is_fixed_size() {
        assert_eq!(CombinedSnapshot::WIRE_LEN, 48);

        let snap = CombinedSnapshot {
            cycle_id: [7, 0, 42],
            vrms: [120.5, 0.0, 49.0],
            irms: [1.25, 0.0, 12.0],
            active: [true, false, true],
        };
        let bytes = snap.to_bytes();
        assert_eq!(&bytes[0..4], &7u32.to_ne_bytes());
        assert_eq!(&bytes[36..40], &1u32.to_ne_bytes());
        assert_eq!(&bytes[40..44], &0u32.to_ne_bytes());
        assert_eq!(CombinedSnapshot::from_bytes(&bytes), snap);
    }

    #[test]
    fn test_status_codes_match_csv_convention() {
        assert_eq!(VoltageStatus::Normal.code(), 0);
        assert_eq!(VoltageStatus::Sag.code(), 1);
        assert_eq!(VoltageStatus::Swell.code(), 2);
        assert_eq!(CurrentStatus::Overcurrent.code(), 1);
        assert_eq!(CurrentStatus::Overcurrent.as_str(), "OVERCURRENT");
    }

    #[test]
    fn test_power_validity_requires_both_results() {
        let mut v = VoltageResult::default();
        let mut i = CurrentResult::default();
        v.rms = [120.0, 230.0, 0.0];
        i.rms = [2.0, 0.5, 3.0];
        v.timestamp = 10;

        let p = PowerResult::from_results(&v, &i);
        assert!(!p.is_valid);
        assert_eq!(p.watts, [240.0, 115.0, 0.0]);

        i.timestamp = 12;
        let p = PowerResult::from_results(&v, &i);
        assert!(p.is_valid);
        assert_eq!(p.timestamp, 12);
    }

    #[test]
    fn test_timestamp() {
        assert!(timestamp_ms() > 1_700_000_000_000, "timestamp should be after 2024");
    }
}
