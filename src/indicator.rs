//! ==============================================================================
//! indicator.rs - priority-based fault indicator arbiter
//! ==============================================================================
//!
//! purpose:
//!     turns the per-node voltage/current status into one lamp state per node.
//!     priority (highest wins, at most one fault colour lit):
//!
//!         1. current OVERCURRENT  -> red, blinking
//!         2. voltage SAG / SWELL  -> amber, blinking
//!         3. otherwise            -> green, solid
//!
//!     a shared blink phase flips every `blink_interval` of wall time. the
//!     driver is only called when a node's requested state differs from the
//!     one last applied (edge write, not level write).
//!
//! relationships:
//!     - reads: state.rs (DerivedView)
//!     - writes: hal.rs (IndicatorDriver)
//!     - driven by: analyzer.rs via worker.rs
//!
//! ==============================================================================

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::{CurrentStatus, VoltageStatus, NUM_NODES};
use crate::hal::{IndicatorDriver, Lamp};
use crate::state::AnalysisState;

/// shared on/off phase for every blinking lamp
pub struct BlinkClock {
    phase: bool,
    last_flip: Instant,
    period: Duration,
}

impl BlinkClock {
    pub fn new(now: Instant, period: Duration) -> Self {
        Self { phase: false, last_flip: now, period }
    }

    /// flip the phase if a full period has elapsed, return the current phase
    pub fn advance(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_flip) >= self.period {
            self.phase = !self.phase;
            self.last_flip = now;
        }
        self.phase
    }
}

pub fn resolve(voltage: VoltageStatus, current: CurrentStatus, blink_on: bool) -> Lamp {
    if current == CurrentStatus::Overcurrent {
        Lamp { red: blink_on, ..Default::default() }
    } else if voltage.is_fault() {
        Lamp { amber: blink_on, ..Default::default() }
    } else {
        Lamp { green: true, ..Default::default() }
    }
}

pub struct IndicatorArbiter {
    state: Arc<AnalysisState>,
    driver: Box<dyn IndicatorDriver>,
    blink: BlinkClock,
    /// last level written per node per channel; None until first write
    applied: [[Option<bool>; 3]; NUM_NODES],
}

impl IndicatorArbiter {
    pub fn new(
        state: Arc<AnalysisState>,
        driver: Box<dyn IndicatorDriver>,
        blink_interval: Duration,
        now: Instant,
    ) -> Self {
        Self {
            state,
            driver,
            blink: BlinkClock::new(now, blink_interval),
            applied: [[None; 3]; NUM_NODES],
        }
    }

    /// One arbiter cycle. Returns how many nodes were written.
    ///
    /// A failed write leaves that node's remembered state untouched so the next
    /// tick retries; the other nodes are still written and the first error is
    /// returned afterwards.
    pub fn tick(&mut self, now: Instant) -> Result<usize> {
        let view = self.state.read_derived();
        let blink_on = self.blink.advance(now);

        let mut writes = 0;
        let mut first_error = None;
        for n in 0..NUM_NODES {
            let lamp = resolve(view.voltage.status[n], view.current.status[n], blink_on);
            let wanted = lamp.channels().map(Some);
            if self.applied[n] == wanted {
                continue;
            }
            match self.driver.set_lamp(n, lamp) {
                Ok(()) => {
                    self.applied[n] = wanted;
                    writes += 1;
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(writes),
        }
    }
}
