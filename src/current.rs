//! ==============================================================================
//! current.rs - current peak calculation and overcurrent classification
//! ==============================================================================
//!
//!     irms > overcurrent_level -> OVERCURRENT
//!     otherwise                -> NORMAL
//!
//! the threshold itself is NORMAL (strict comparison).
//!
//! ==============================================================================

use std::sync::Arc;

use crate::config::ThresholdConfig;
use crate::domain::{timestamp_ms, CombinedSnapshot, CurrentResult, CurrentStatus, NUM_NODES, PEAK_FACTOR};
use crate::state::AnalysisState;

pub fn classify(irms: f32, thresholds: &ThresholdConfig) -> CurrentStatus {
    if irms > thresholds.overcurrent_level {
        CurrentStatus::Overcurrent
    } else {
        CurrentStatus::Normal
    }
}

pub fn analyze(raw: &CombinedSnapshot, thresholds: &ThresholdConfig, timestamp: u64) -> CurrentResult {
    let mut result = CurrentResult { timestamp, ..Default::default() };
    for n in 0..NUM_NODES {
        let irms = raw.irms[n];
        result.rms[n] = irms;
        result.peak[n] = irms * PEAK_FACTOR;
        result.status[n] = classify(irms, thresholds);
    }
    result
}

pub struct CurrentAnalyzer {
    state: Arc<AnalysisState>,
    thresholds: ThresholdConfig,
}

impl CurrentAnalyzer {
    pub fn new(state: Arc<AnalysisState>, thresholds: ThresholdConfig) -> Self {
        Self { state, thresholds }
    }

    pub fn tick(&self) -> CurrentResult {
        let raw = self.state.read_raw();
        let result = analyze(&raw, &self.thresholds, timestamp_ms());
        self.state.publish_current(result);
        result
    }
}
