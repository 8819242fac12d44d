//! ==============================================================================
//! main.rs - gridwatch entry point
//! ==============================================================================
//!
//! purpose:
//!     one binary, two roles. the role comes from the first cli argument or,
//!     when absent, from `role` in gridwatch.toml.
//!
//! usage:
//!     gridwatch ingest   [path/to/gridwatch.toml]
//!     gridwatch analyzer [path/to/gridwatch.toml]
//!
//! relationships:
//!     - ingest.rs    process A (udp -> shared memory)
//!     - analyzer.rs  process B (shared memory -> leds + logs)
//!
//!     start either process first; both create the shared segment on demand.
//!
//! ==============================================================================

use anyhow::{bail, Result};

use gridwatch::config::MonitorConfig;
use gridwatch::{analyzer, ingest, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  gridwatch - Multi-Node Power Fault Monitor");
    println!("===========================================================");

    let mut args = std::env::args().skip(1);
    let role_arg = args.next();
    let config_arg = args.next();

    // step 1: load configuration (logged through a temporary subscriber)
    let mut config = tracing::subscriber::with_default(telemetry::bootstrap(), || match &config_arg {
        Some(path) => MonitorConfig::load(path),
        None => Ok(MonitorConfig::load_or_default()),
    })?;
    if let Some(role) = role_arg {
        config.role = role;
    }

    // step 2: install logging at the configured level
    telemetry::init(&config.logging.level);
    config.print_summary();

    // step 3: hand over to the selected process
    match config.role.as_str() {
        "ingest" => ingest::run(config).await,
        "analyzer" => analyzer::run(config).await,
        other => bail!("unknown role '{}' (expected ingest or analyzer)", other),
    }
}
