//! ==============================================================================
//! eventlog.rs - rolling sample log + edge-triggered fault event log
//! ==============================================================================
//!
//! purpose:
//!     two files, both truncated at startup with a fixed header:
//!
//!     - power_monitor.csv: one row per sample window (10 s of wall time by
//!       default) with cycle ids, rms/peak, status codes and power per node.
//!     - fault_events.txt: one line per node per status change, including the
//!       return to NORMAL. an unchanged status never writes.
//!
//!     both are flushed after every write so a crash loses at most one tick.
//!
//! relationships:
//!     - reads: state.rs (DerivedView)
//!     - driven by: analyzer.rs via worker.rs
//!
//! ==============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::{CurrentStatus, VoltageStatus, NUM_NODES};
use crate::state::{AnalysisState, DerivedView};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const EVENT_LOG_BANNER: &str = "\
============================================================================
                      POWER MONITOR FAULT EVENT LOG
============================================================================
";

/// column groups of the sample log, each expanded to one column per node
const CSV_GROUPS: [&str; 8] = ["cycle", "vrms", "vpeak", "irms", "ipeak", "vstat", "istat", "power"];

pub fn csv_header() -> Vec<String> {
    let mut header = vec!["timestamp".to_string()];
    for group in CSV_GROUPS {
        header.extend((1..=NUM_NODES).map(|n| format!("{}{}", group, n)));
    }
    header
}

// ==============================================================================
// fault events
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Voltage { previous: VoltageStatus, new: VoltageStatus },
    Current { previous: CurrentStatus, new: CurrentStatus },
}

/// a status change on one node, materialised only when it happens
#[derive(Debug, Clone, PartialEq)]
pub struct FaultEvent {
    /// 1-based node id
    pub node: usize,
    pub timestamp: DateTime<Local>,
    pub transition: Transition,
    /// rms of the channel that changed
    pub value: f32,
    pub cycle_id: u32,
}

impl fmt::Display for FaultEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (headline, unit, previous, new) = match self.transition {
            Transition::Voltage { previous, new } => {
                let headline = match new {
                    VoltageStatus::Sag => "VOLTAGE SAG DETECTED",
                    VoltageStatus::Swell => "VOLTAGE SWELL DETECTED",
                    VoltageStatus::Normal => "Voltage returned to NORMAL",
                };
                (headline, "V", previous.as_str(), new.as_str())
            }
            Transition::Current { previous, new } => {
                let headline = match new {
                    CurrentStatus::Overcurrent => "OVERCURRENT DETECTED",
                    CurrentStatus::Normal => "Current returned to NORMAL",
                };
                (headline, "A", previous.as_str(), new.as_str())
            }
        };
        write!(
            f,
            "[{}] NODE {}: {:<26} - {:.2} {} (cycle {}, {} -> {})",
            self.timestamp.format(TIME_FORMAT),
            self.node,
            headline,
            self.value,
            unit,
            self.cycle_id,
            previous,
            new
        )
    }
}

/// remembers the previous tick's statuses and reports what changed
pub struct TransitionDetector {
    voltage: [VoltageStatus; NUM_NODES],
    current: [CurrentStatus; NUM_NODES],
}

impl Default for TransitionDetector {
    fn default() -> Self {
        Self {
            voltage: [VoltageStatus::Normal; NUM_NODES],
            current: [CurrentStatus::Normal; NUM_NODES],
        }
    }
}

impl TransitionDetector {
    pub fn observe(&mut self, view: &DerivedView, timestamp: DateTime<Local>) -> Vec<FaultEvent> {
        let mut events = Vec::new();
        for n in 0..NUM_NODES {
            let v = view.voltage.status[n];
            if v != self.voltage[n] {
                events.push(FaultEvent {
                    node: n + 1,
                    timestamp,
                    transition: Transition::Voltage { previous: self.voltage[n], new: v },
                    value: view.voltage.rms[n],
                    cycle_id: view.cycle_id[n],
                });
                self.voltage[n] = v;
            }

            let i = view.current.status[n];
            if i != self.current[n] {
                events.push(FaultEvent {
                    node: n + 1,
                    timestamp,
                    transition: Transition::Current { previous: self.current[n], new: i },
                    value: view.current.rms[n],
                    cycle_id: view.cycle_id[n],
                });
                self.current[n] = i;
            }
        }
        events
    }
}

// ==============================================================================
// logger
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub transitions: usize,
    pub sample_written: bool,
}

pub struct EventLogger {
    state: Arc<AnalysisState>,
    samples: csv::Writer<File>,
    events: BufWriter<File>,
    detector: TransitionDetector,
    sample_interval: Duration,
    last_sample: Instant,
}

impl EventLogger {
    /// Open both logs in truncate mode and write their headers.
    ///
    /// The first sample row is due one `sample_interval` after `now`.
    pub fn create(
        state: Arc<AnalysisState>,
        csv_path: &Path,
        event_path: &Path,
        sample_interval: Duration,
        now: Instant,
    ) -> Result<Self> {
        let csv_file = File::create(csv_path)
            .with_context(|| format!("CSV open failed: {}", csv_path.display()))?;
        let mut samples = csv::Writer::from_writer(csv_file);
        samples.write_record(csv_header())?;
        samples.flush()?;

        let event_file = File::create(event_path)
            .with_context(|| format!("event log open failed: {}", event_path.display()))?;
        let mut events = BufWriter::new(event_file);
        writeln!(events, "{}", EVENT_LOG_BANNER)?;
        events.flush()?;

        tracing::info!(
            csv = %csv_path.display(),
            events = %event_path.display(),
            "[LOG] log files reset"
        );

        Ok(Self {
            state,
            samples,
            events,
            detector: TransitionDetector::default(),
            sample_interval,
            last_sample: now,
        })
    }

    pub fn tick(&mut self, now: Instant, wall: DateTime<Local>) -> Result<TickReport> {
        let view = self.state.read_derived();
        let mut report = TickReport::default();

        for event in self.detector.observe(&view, wall) {
            writeln!(self.events, "{}", event)?;
            self.events.flush()?;
            if matches!(
                event.transition,
                Transition::Voltage { new: VoltageStatus::Normal, .. }
                    | Transition::Current { new: CurrentStatus::Normal, .. }
            ) {
                tracing::info!("[EVENT] {}", event);
            } else {
                tracing::warn!("[EVENT] {}", event);
            }
            report.transitions += 1;
        }

        if now.saturating_duration_since(self.last_sample) >= self.sample_interval {
            self.last_sample = now;
            self.write_sample(&view, wall)?;
            report.sample_written = true;
        }

        Ok(report)
    }

    fn write_sample(&mut self, view: &DerivedView, wall: DateTime<Local>) -> Result<()> {
        let mut row = Vec::with_capacity(1 + CSV_GROUPS.len() * NUM_NODES);
        row.push(wall.format(TIME_FORMAT).to_string());
        row.extend(view.cycle_id.iter().map(|c| c.to_string()));
        row.extend(view.voltage.rms.iter().map(|v| format!("{:.3}", v)));
        row.extend(view.voltage.peak.iter().map(|v| format!("{:.3}", v)));
        row.extend(view.current.rms.iter().map(|v| format!("{:.3}", v)));
        row.extend(view.current.peak.iter().map(|v| format!("{:.3}", v)));
        row.extend(view.voltage.status.iter().map(|s| s.code().to_string()));
        row.extend(view.current.status.iter().map(|s| s.code().to_string()));
        row.extend((0..NUM_NODES).map(|n| format!("{:.3}", view.voltage.rms[n] * view.current.rms[n])));

        self.samples.write_record(&row)?;
        self.samples.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CurrentResult, VoltageResult};
    use chrono::TimeZone;

    const TICK: Duration = Duration::from_millis(50);

    struct Fixture {
        _dir: tempfile::TempDir,
        csv_path: std::path::PathBuf,
        event_path: std::path::PathBuf,
        state: Arc<AnalysisState>,
        logger: EventLogger,
        start: Instant,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("power_monitor.csv");
        let event_path = dir.path().join("fault_events.txt");
        let state = Arc::new(AnalysisState::new());
        let start = Instant::now();
        let logger = EventLogger::create(
            Arc::clone(&state),
            &csv_path,
            &event_path,
            Duration::from_secs(10),
            start,
        )
        .unwrap();
        Fixture { _dir: dir, csv_path, event_path, state, logger, start }
    }

    fn wall() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 12, 1, 10, 0, 0).unwrap()
    }

    fn event_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter(|l| l.starts_with('['))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_headers_written_on_create() {
        let f = fixture();
        let csv = std::fs::read_to_string(&f.csv_path).unwrap();
        assert_eq!(
            csv.lines().next().unwrap(),
            "timestamp,cycle1,cycle2,cycle3,vrms1,vrms2,vrms3,vpeak1,vpeak2,vpeak3,\
             irms1,irms2,irms3,ipeak1,ipeak2,ipeak3,vstat1,vstat2,vstat3,\
             istat1,istat2,istat3,power1,power2,power3"
        );
        let events = std::fs::read_to_string(&f.event_path).unwrap();
        assert!(events.contains("POWER MONITOR FAULT EVENT LOG"));
        assert!(event_lines(&f.event_path).is_empty());
    }

    #[test]
    fn test_create_truncates_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("s.csv");
        let event_path = dir.path().join("e.txt");
        std::fs::write(&csv_path, "old,data\n1,2\n").unwrap();
        std::fs::write(&event_path, "[old] stale line\n").unwrap();

        let state = Arc::new(AnalysisState::new());
        EventLogger::create(state, &csv_path, &event_path, Duration::from_secs(10), Instant::now())
            .unwrap();

        assert_eq!(std::fs::read_to_string(&csv_path).unwrap().lines().count(), 1);
        assert!(event_lines(&event_path).is_empty());
    }

    #[test]
    fn test_unchanged_status_writes_nothing() {
        let mut f = fixture();
        for k in 0..100 {
            let report = f.logger.tick(f.start + TICK * k, wall()).unwrap();
            assert_eq!(report.transitions, 0);
        }
        assert!(event_lines(&f.event_path).is_empty());
    }

    #[test]
    fn test_single_change_writes_one_line() {
        let mut f = fixture();
        for k in 0..10 {
            f.logger.tick(f.start + TICK * k, wall()).unwrap();
        }

        f.state.publish_voltage(VoltageResult {
            rms: [45.0, 120.0, 120.0],
            status: [VoltageStatus::Sag, VoltageStatus::Normal, VoltageStatus::Normal],
            timestamp: 1,
            ..Default::default()
        });
        for k in 10..100 {
            f.logger.tick(f.start + TICK * k, wall()).unwrap();
        }

        let lines = event_lines(&f.event_path);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("[2025-12-01 10:00:00] NODE 1: VOLTAGE SAG DETECTED"));
        assert!(lines[0].contains("45.00 V"));
    }

    #[test]
    fn test_return_to_normal_is_logged() {
        let mut f = fixture();
        f.state.publish_current(CurrentResult {
            rms: [0.0, 0.0, 12.5],
            status: [CurrentStatus::Normal, CurrentStatus::Normal, CurrentStatus::Overcurrent],
            timestamp: 1,
            ..Default::default()
        });
        f.logger.tick(f.start, wall()).unwrap();

        f.state.publish_current(CurrentResult {
            rms: [0.0, 0.0, 4.0],
            timestamp: 2,
            ..Default::default()
        });
        f.logger.tick(f.start + TICK, wall()).unwrap();

        let lines = event_lines(&f.event_path);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("NODE 3: OVERCURRENT DETECTED"));
        assert!(lines[1].contains("NODE 3: Current returned to NORMAL"));
        assert!(lines[1].contains("OVERCURRENT -> NORMAL"));
    }

    #[test]
    fn test_sag_to_swell_logs_new_fault() {
        let mut detector = TransitionDetector::default();
        let state = AnalysisState::new();

        let mut v = VoltageResult { timestamp: 1, ..Default::default() };
        v.status[1] = VoltageStatus::Sag;
        state.publish_voltage(v);
        assert_eq!(detector.observe(&state.read_derived(), wall()).len(), 1);

        v.status[1] = VoltageStatus::Swell;
        state.publish_voltage(v);
        let events = detector.observe(&state.read_derived(), wall());
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].transition,
            Transition::Voltage { previous: VoltageStatus::Sag, new: VoltageStatus::Swell }
        );
    }

    #[test]
    fn test_sample_cadence_follows_wall_time() {
        let mut f = fixture();
        let mut written = 0;
        // 25 s of 50 ms ticks
        for k in 0..=500 {
            if f.logger.tick(f.start + TICK * k, wall()).unwrap().sample_written {
                written += 1;
            }
        }
        assert_eq!(written, 2);

        let csv = std::fs::read_to_string(&f.csv_path).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn test_sample_row_format() {
        let mut f = fixture();
        f.state.update_raw(&crate::domain::CombinedSnapshot {
            cycle_id: [11, 22, 33],
            active: [true; NUM_NODES],
            ..Default::default()
        });
        f.state.publish_voltage(VoltageResult {
            rms: [120.0, 45.0, 0.0],
            peak: [169.706, 63.640, 0.0],
            status: [VoltageStatus::Normal, VoltageStatus::Sag, VoltageStatus::Normal],
            timestamp: 1,
        });
        f.state.publish_current(CurrentResult {
            rms: [2.0, 1.0, 0.0],
            peak: [2.828, 1.414, 0.0],
            status: [CurrentStatus::Normal; NUM_NODES],
            timestamp: 1,
        });

        let report = f.logger.tick(f.start + Duration::from_secs(10), wall()).unwrap();
        assert!(report.sample_written);

        let csv = std::fs::read_to_string(&f.csv_path).unwrap();
        let row: Vec<&str> = csv.lines().nth(1).unwrap().split(',').collect();
        assert_eq!(row.len(), 25);
        assert_eq!(row[0], "2025-12-01 10:00:00");
        assert_eq!(&row[1..4], &["11", "22", "33"]);
        assert_eq!(row[4], "120.000");
        assert_eq!(row[17], "1");
        assert_eq!(row[22], "240.000");
        assert_eq!(row[23], "45.000");
    }

    #[test]
    fn test_open_failure_is_reported() {
        let state = Arc::new(AnalysisState::new());
        let missing = Path::new("/nonexistent-dir/for/sure/power.csv");
        let result = EventLogger::create(
            state,
            missing,
            Path::new("/nonexistent-dir/for/sure/events.txt"),
            Duration::from_secs(10),
            Instant::now(),
        );
        assert!(result.is_err());
    }
}
