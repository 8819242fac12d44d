//! ==============================================================================
//! voltage.rs - voltage peak calculation and sag/swell classification
//! ==============================================================================
//!
//! classification is stateless and recomputed from scratch every tick:
//!
//!     rms <  no_signal_level  -> NORMAL (no signal)
//!     rms <  sag_level        -> SAG
//!     rms >  swell_level      -> SWELL
//!     otherwise               -> NORMAL
//!
//! comparisons are strict, so a value exactly on a threshold falls through
//! to the next branch (50.0 is NORMAL, 130.0 is NORMAL).
//!
//! ==============================================================================

use std::sync::Arc;

use crate::config::ThresholdConfig;
use crate::domain::{timestamp_ms, CombinedSnapshot, VoltageResult, VoltageStatus, NUM_NODES, PEAK_FACTOR};
use crate::state::AnalysisState;

pub fn classify(vrms: f32, thresholds: &ThresholdConfig) -> VoltageStatus {
    if vrms < thresholds.no_signal_level {
        VoltageStatus::Normal
    } else if vrms < thresholds.sag_level {
        VoltageStatus::Sag
    } else if vrms > thresholds.swell_level {
        VoltageStatus::Swell
    } else {
        VoltageStatus::Normal
    }
}

/// build a complete result for every node from the latest raw values
pub fn analyze(raw: &CombinedSnapshot, thresholds: &ThresholdConfig, timestamp: u64) -> VoltageResult {
    let mut result = VoltageResult { timestamp, ..Default::default() };
    for n in 0..NUM_NODES {
        let vrms = raw.vrms[n];
        result.rms[n] = vrms;
        result.peak[n] = vrms * PEAK_FACTOR;
        result.status[n] = classify(vrms, thresholds);
    }
    result
}

/// periodic worker body: read raw, classify, publish
pub struct VoltageAnalyzer {
    state: Arc<AnalysisState>,
    thresholds: ThresholdConfig,
}

impl VoltageAnalyzer {
    pub fn new(state: Arc<AnalysisState>, thresholds: ThresholdConfig) -> Self {
        Self { state, thresholds }
    }

    pub fn tick(&self) -> VoltageResult {
        let raw = self.state.read_raw();
        let result = analyze(&raw, &self.thresholds, timestamp_ms());
        self.state.publish_voltage(result);
        result
    }
}
