//! ==============================================================================
//! state.rs - shared analysis state (process B)
//! ==============================================================================
//!
//! purpose:
//!     one record holding the raw RMS inputs received over ipc and the derived
//!     voltage / current / power results, guarded by a single mutex.
//!     callers never touch the fields; every method copies in or out under one
//!     lock acquisition, so nobody sees a partial view and no lock is held
//!     across i/o.
//!
//!     a condvar signals "raw data changed". the periodic workers do not wait
//!     on it (they poll every 50 ms, staleness is bounded by that interval);
//!     the stale-feed watchdog in analyzer.rs is its only waiter.
//!
//! relationships:
//!     - written by: analyzer.rs (ipc consumer), voltage.rs, current.rs
//!     - read by: indicator.rs, eventlog.rs, http.rs
//!
//! ==============================================================================

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::domain::{
    CombinedSnapshot, CurrentResult, PowerResult, VoltageResult, NUM_NODES,
};

struct Inner {
    raw: CombinedSnapshot,
    voltage: VoltageResult,
    current: CurrentResult,
    power: PowerResult,
    /// bumped on every update_raw, lets waiters detect a change
    raw_generation: u64,
}

/// everything the output workers need, copied out in one acquisition
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedView {
    pub cycle_id: [u32; NUM_NODES],
    pub active: [bool; NUM_NODES],
    pub voltage: VoltageResult,
    pub current: CurrentResult,
    pub power: PowerResult,
}

pub struct AnalysisState {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl Default for AnalysisState {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisState {
    /// zeroed RMS, every node marked active
    pub fn new() -> Self {
        let raw = CombinedSnapshot {
            active: [true; NUM_NODES],
            ..CombinedSnapshot::default()
        };
        Self {
            inner: Mutex::new(Inner {
                raw,
                voltage: VoltageResult::default(),
                current: CurrentResult::default(),
                power: PowerResult::default(),
                raw_generation: 0,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn update_raw(&self, snapshot: &CombinedSnapshot) {
        {
            let mut inner = self.inner.lock();
            inner.raw = *snapshot;
            inner.raw_generation = inner.raw_generation.wrapping_add(1);
        }
        self.changed.notify_all();
    }

    pub fn read_raw(&self) -> CombinedSnapshot {
        self.inner.lock().raw
    }

    pub fn publish_voltage(&self, result: VoltageResult) {
        let mut inner = self.inner.lock();
        inner.voltage = result;
        let power = PowerResult::from_results(&inner.voltage, &inner.current);
        inner.power = power;
    }

    pub fn publish_current(&self, result: CurrentResult) {
        let mut inner = self.inner.lock();
        inner.current = result;
        let power = PowerResult::from_results(&inner.voltage, &inner.current);
        inner.power = power;
    }

    pub fn read_derived(&self) -> DerivedView {
        let inner = self.inner.lock();
        DerivedView {
            cycle_id: inner.raw.cycle_id,
            active: inner.raw.active,
            voltage: inner.voltage,
            current: inner.current,
            power: inner.power,
        }
    }

    /// Block until `update_raw` is called or `timeout` passes.
    ///
    /// Returns false on timeout.
    pub fn wait_for_update(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        let seen = inner.raw_generation;
        while inner.raw_generation == seen {
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return inner.raw_generation != seen;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CurrentStatus, VoltageStatus};
    use std::sync::Arc;

    #[test]
    fn test_initial_state() {
        let state = AnalysisState::new();
        let raw = state.read_raw();
        assert_eq!(raw.vrms, [0.0; NUM_NODES]);
        assert_eq!(raw.active, [true; NUM_NODES]);

        let view = state.read_derived();
        assert_eq!(view.voltage.status, [VoltageStatus::Normal; NUM_NODES]);
        assert!(!view.power.is_valid);
    }

    #[test]
    fn test_update_raw_replaces_all_fields() {
        let state = AnalysisState::new();
        let snap = CombinedSnapshot {
            cycle_id: [4, 5, 6],
            vrms: [120.0, 45.0, 135.0],
            irms: [1.0, 2.0, 12.0],
            active: [true, false, true],
        };
        state.update_raw(&snap);
        assert_eq!(state.read_raw(), snap);
        assert_eq!(state.read_derived().cycle_id, [4, 5, 6]);
    }

    #[test]
    fn test_power_follows_published_results() {
        let state = AnalysisState::new();
        state.publish_voltage(VoltageResult {
            rms: [100.0, 120.0, 0.0],
            timestamp: 1,
            ..Default::default()
        });
        state.publish_current(CurrentResult {
            rms: [2.0, 0.5, 1.0],
            status: [CurrentStatus::Normal; NUM_NODES],
            timestamp: 2,
            ..Default::default()
        });

        let power = state.read_derived().power;
        assert!(power.is_valid);
        assert_eq!(power.watts, [200.0, 60.0, 0.0]);
    }

    #[test]
    fn test_wait_for_update_wakes_on_change() {
        let state = Arc::new(AnalysisState::new());
        let writer = Arc::clone(&state);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.update_raw(&CombinedSnapshot::default());
        });

        assert!(state.wait_for_update(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_for_update_times_out() {
        let state = AnalysisState::new();
        assert!(!state.wait_for_update(Duration::from_millis(30)));
    }
}
