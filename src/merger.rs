//! ==============================================================================
//! merger.rs - fold per-node samples into one combined snapshot
//! ==============================================================================
//!
//! purpose:
//!     every valid NodeSample overwrites its node's slot (last write wins) and
//!     the whole snapshot is pushed straight into the ipc channel. there is no
//!     batching window and no queue: older in-flight values are discarded.
//!
//!     a node becomes `active` on its first sample and stays active; silence
//!     never clears the flag.
//!
//! relationships:
//!     - used by: ingest.rs
//!     - pushes to: ipc.rs (SnapshotSink)
//!
//! ==============================================================================

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{CombinedSnapshot, NodeSample};
use crate::ipc::{IpcError, SnapshotSink};
use crate::packet::PacketError;

#[derive(Debug, Error)]
pub enum MergeError {
    /// the sample names a node without a slot; nothing was written
    #[error(transparent)]
    Rejected(#[from] PacketError),
    /// the slot was updated but the push downstream failed
    #[error(transparent)]
    Ipc(#[from] IpcError),
}

pub struct SnapshotMerger {
    snapshot: Mutex<CombinedSnapshot>,
    sink: Arc<dyn SnapshotSink>,
}

impl SnapshotMerger {
    pub fn new(sink: Arc<dyn SnapshotSink>) -> Self {
        Self {
            snapshot: Mutex::new(CombinedSnapshot::default()),
            sink,
        }
    }

    /// overwrite the node's slot and offer the full snapshot downstream
    pub fn merge(&self, sample: &NodeSample) -> Result<(), MergeError> {
        let n = sample
            .index()
            .ok_or(PacketError::NodeOutOfRange(sample.node_id))?;
        let mut snap = self.snapshot.lock();

        snap.cycle_id[n] = sample.cycle_id;
        snap.vrms[n] = sample.vrms;
        snap.irms[n] = sample.irms;
        snap.active[n] = true;

        self.sink.send(&snap)?;
        Ok(())
    }

    /// copy of the current combined view
    pub fn snapshot(&self) -> CombinedSnapshot {
        *self.snapshot.lock()
    }
}

// ==============================================================================
// ingest counters
// ==============================================================================
// dropped datagrams are counted, not logged, so lossy or hostile input
// cannot flood the log.

#[derive(Default)]
pub struct IngestStats {
    accepted: AtomicU64,
    malformed: AtomicU64,
    fault_reports: AtomicU64,
    ipc_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestCounters {
    pub accepted: u64,
    pub malformed: u64,
    pub fault_reports: u64,
    pub ipc_failures: u64,
}

impl IngestStats {
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fault_report(&self) {
        self.fault_reports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ipc_failure(&self) {
        self.ipc_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> IngestCounters {
        let counters = IngestCounters {
            accepted: self.accepted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            fault_reports: self.fault_reports.load(Ordering::Relaxed),
            ipc_failures: self.ipc_failures.load(Ordering::Relaxed),
        };
        tracing::debug!(?counters, "[INGEST] counters");
        counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// records every pushed snapshot instead of crossing a process boundary
    #[derive(Default)]
    struct RecordingSink {
        pushed: Mutex<Vec<CombinedSnapshot>>,
    }

    impl SnapshotSink for RecordingSink {
        fn send(&self, snapshot: &CombinedSnapshot) -> Result<(), IpcError> {
            self.pushed.lock().push(*snapshot);
            Ok(())
        }
    }

    fn sample(node_id: u32, cycle_id: u32, vrms: f32, irms: f32) -> NodeSample {
        NodeSample { node_id, cycle_id, vrms, irms }
    }

    #[test]
    fn test_latest_cycle_wins() {
        let sink = Arc::new(RecordingSink::default());
        let merger = SnapshotMerger::new(sink.clone());

        merger.merge(&sample(2, 10, 118.0, 3.0)).unwrap();
        merger.merge(&sample(2, 11, 121.0, 3.5)).unwrap();

        let snap = merger.snapshot();
        assert_eq!(snap.cycle_id, [0, 11, 0]);
        assert_eq!(snap.vrms[1], 121.0);
        assert_eq!(snap.irms[1], 3.5);
        assert_eq!(snap.active, [false, true, false]);
    }

    #[test]
    fn test_every_merge_pushes_full_snapshot() {
        let sink = Arc::new(RecordingSink::default());
        let merger = SnapshotMerger::new(sink.clone());

        merger.merge(&sample(1, 1, 120.0, 1.0)).unwrap();
        merger.merge(&sample(3, 5, 45.0, 12.0)).unwrap();

        let pushed = sink.pushed.lock();
        assert_eq!(pushed.len(), 2);
        assert_eq!(pushed[1].active, [true, false, true]);
        assert_eq!(pushed[1].vrms, [120.0, 0.0, 45.0]);
    }

    #[test]
    fn test_active_flag_is_sticky() {
        let sink = Arc::new(RecordingSink::default());
        let merger = SnapshotMerger::new(sink);

        merger.merge(&sample(1, 1, 0.0, 0.0)).unwrap();
        for cycle in 0..5 {
            merger.merge(&sample(2, cycle, 120.0, 1.0)).unwrap();
        }
        assert!(merger.snapshot().active[0]);
    }

    #[test]
    fn test_uninitialized_sink_error_surfaces() {
        let merger = SnapshotMerger::new(Arc::new(crate::ipc::IpcChannel::detached()));
        let err = merger.merge(&sample(1, 1, 120.0, 1.0)).unwrap_err();
        assert!(matches!(err, MergeError::Ipc(IpcError::NotInitialized)));
        // the slot is still updated locally
        assert_eq!(merger.snapshot().cycle_id[0], 1);
    }

    #[test]
    fn test_out_of_range_node_is_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let merger = SnapshotMerger::new(sink.clone());

        for node_id in [0, 4, u32::MAX] {
            let err = merger.merge(&sample(node_id, 9, 120.0, 1.0)).unwrap_err();
            assert!(matches!(err, MergeError::Rejected(PacketError::NodeOutOfRange(id)) if id == node_id));
        }

        assert_eq!(merger.snapshot(), CombinedSnapshot::default());
        assert!(sink.pushed.lock().is_empty());
    }

    #[test]
    fn test_counters() {
        let stats = IngestStats::default();
        stats.record_accepted();
        stats.record_accepted();
        stats.record_malformed();
        let c = stats.counters();
        assert_eq!((c.accepted, c.malformed, c.fault_reports), (2, 1, 0));
    }
}
