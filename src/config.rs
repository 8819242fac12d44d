//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `gridwatch.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - role: which process this binary runs as ("ingest" or "analyzer").
//!     - NetworkConfig: UDP ports for telemetry and the control channel.
//!     - IpcConfig: names of the shared segment and the ready semaphore.
//!     - ThresholdConfig: sag / swell / overcurrent levels.
//!     - TimingConfig: polling, blink and sample-log cadences.
//!     - LoggingConfig: log level and the two log file paths.
//!     - IndicatorConfig: BCM pins for the per-node green/amber/red LEDs.
//!     - HttpConfig: optional status/control endpoints.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::NUM_NODES;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub ipc: IpcConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_role() -> String {
    "analyzer".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub data_port: u16,
    pub control_port: u16,
    pub bind_addr: String,
    /// where SET_MODE / SET_SEND / ACK commands are broadcast
    pub broadcast_addr: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            data_port: 5005,
            control_port: 6000,
            bind_addr: "0.0.0.0".to_string(),
            broadcast_addr: "255.255.255.255".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IpcConfig {
    pub shm_name: String,
    pub sem_name: String,
    /// directory where named shared memory objects live (tmpfs)
    pub shm_dir: PathBuf,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            shm_name: "/gridwatch_snapshot".to_string(),
            sem_name: "/gridwatch_ready".to_string(),
            shm_dir: PathBuf::from("/dev/shm"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ThresholdConfig {
    pub sag_level: f32,
    pub swell_level: f32,
    pub overcurrent_level: f32,
    /// below this the voltage channel is treated as "no signal"
    pub no_signal_level: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            sag_level: 50.0,
            swell_level: 130.0,
            overcurrent_level: 11.0,
            no_signal_level: 0.1,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_interval_ms: u64,
    pub blink_interval_ms: u64,
    pub sample_log_interval_secs: u64,
    pub stale_feed_warn_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            blink_interval_ms: 200,
            sample_log_interval_secs: 10,
            stale_feed_warn_secs: 5,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn blink_interval(&self) -> Duration {
        Duration::from_millis(self.blink_interval_ms)
    }

    pub fn sample_log_interval(&self) -> Duration {
        Duration::from_secs(self.sample_log_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub csv_path: PathBuf,
    pub event_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            csv_path: PathBuf::from("power_monitor.csv"),
            event_path: PathBuf::from("fault_events.txt"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndicatorConfig {
    /// [node][0=green, 1=amber (voltage), 2=red (current)]
    pub pins: [[u8; 3]; NUM_NODES],
    /// ingest-side mode LEDs: [adc, sd, udp]
    pub mode_pins: [u8; 3],
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            pins: [[27, 17, 22], [21, 20, 16], [13, 19, 26]],
            mode_pins: [23, 24, 12],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub ingest_bind: String,
    pub analyzer_bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ingest_bind: "0.0.0.0:3000".to_string(),
            analyzer_bind: "0.0.0.0:3001".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: MonitorConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("gridwatch.toml"),
            PathBuf::from("..").join("config").join("gridwatch.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        tracing::info!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("[CONFIG] Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        tracing::warn!("[CONFIG] No config file found - using defaults");
        Self::default()
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        tracing::info!(
            role = %self.role,
            data_port = self.network.data_port,
            control_port = self.network.control_port,
            shm = %self.ipc.shm_name,
            poll_ms = self.timing.poll_interval_ms,
            sag = self.thresholds.sag_level,
            swell = self.thresholds.swell_level,
            overcurrent = self.thresholds.overcurrent_level,
            http = self.http.enabled,
            "[CONFIG] effective configuration"
        );
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            network: NetworkConfig::default(),
            ipc: IpcConfig::default(),
            thresholds: ThresholdConfig::default(),
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
            indicators: IndicatorConfig::default(),
            http: HttpConfig::default(),
        }
    }
}
