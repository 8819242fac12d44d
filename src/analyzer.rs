//! ==============================================================================
//! analyzer.rs - process B: analysis, indicators and logging
//! ==============================================================================
//!
//! purpose:
//!     consumes combined snapshots from the ipc channel and runs the periodic
//!     workers that classify, display and log them.
//!
//! architecture:
//!
//!     IpcChannel ──receive──> [ipc-consumer] ──update_raw──> AnalysisState
//!                                                                │
//!            ┌───────────────┬───────────────┬───────────────────┤
//!            ▼               ▼               ▼                   ▼
//!       [voltage]        [current]       [indicator]        [event-log]
//!     publish_voltage  publish_current   Hal (LEDs)     csv + fault events
//!
//!     every bracketed box is a named OS thread. periodic workers poll the
//!     state every `poll_interval_ms`; only [feed-watchdog] blocks on the
//!     state's condvar, to warn when ingestion goes quiet.
//!
//! shutdown:
//!     Ctrl-C sets the stop flag, the periodic workers finish their current
//!     tick, then the ipc names are unlinked.
//!
//! ==============================================================================

use anyhow::{Context, Result};
use chrono::Local;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::MonitorConfig;
use crate::current::CurrentAnalyzer;
use crate::eventlog::EventLogger;
use crate::hal::{Hal, IndicatorDriver};
use crate::http;
use crate::indicator::IndicatorArbiter;
use crate::ipc::{IpcChannel, IpcError};
use crate::state::AnalysisState;
use crate::voltage::VoltageAnalyzer;
use crate::worker::spawn_periodic;

/// back-off after a failed receive so a broken semaphore cannot spin a core
const RECEIVE_RETRY: Duration = Duration::from_millis(50);

/// Copy every received snapshot into the shared state.
///
/// Stops when the channel reports it is not (or no longer) initialized.
pub fn spawn_ipc_consumer(channel: Arc<IpcChannel>, state: Arc<AnalysisState>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new().name("ipc-consumer".to_string()).spawn(move || {
        tracing::info!("[THREAD] ipc-consumer started");
        loop {
            match channel.receive() {
                Ok(snapshot) => state.update_raw(&snapshot),
                Err(IpcError::NotInitialized) => break,
                Err(e) => {
                    tracing::error!("[IPC] receive failed: {}", e);
                    std::thread::sleep(RECEIVE_RETRY);
                }
            }
        }
        tracing::info!("[THREAD] ipc-consumer stopped");
    })
}

/// Warn when no snapshot has arrived for `quiet`.
///
/// Fires once per silent period and logs again when the feed resumes.
pub fn spawn_watchdog(state: Arc<AnalysisState>, quiet: Duration, stop: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new().name("feed-watchdog".to_string()).spawn(move || {
        let mut silent = false;
        while !stop.load(Ordering::Relaxed) {
            let updated = state.wait_for_update(quiet);
            if !updated && !silent {
                tracing::warn!("[IPC] no snapshot received for {:?}", quiet);
                silent = true;
            } else if updated && silent {
                tracing::info!("[IPC] snapshot feed resumed");
                silent = false;
            }
        }
    })
}

/// Start the four periodic workers.
///
/// The event logger is optional: if its files cannot be opened the error is
/// logged and the remaining workers still run.
pub fn spawn_workers(
    config: &MonitorConfig,
    state: Arc<AnalysisState>,
    driver: Box<dyn IndicatorDriver>,
    stop: Arc<AtomicBool>,
) -> Result<Vec<JoinHandle<()>>> {
    let poll = config.timing.poll_interval();
    let mut handles = Vec::with_capacity(4);

    let voltage = VoltageAnalyzer::new(state.clone(), config.thresholds);
    let flag = stop.clone();
    handles.push(spawn_periodic("voltage", poll, move |_| {
        if flag.load(Ordering::Relaxed) {
            return ControlFlow::Break(());
        }
        voltage.tick();
        ControlFlow::Continue(())
    })?);

    let current = CurrentAnalyzer::new(state.clone(), config.thresholds);
    let flag = stop.clone();
    handles.push(spawn_periodic("current", poll, move |_| {
        if flag.load(Ordering::Relaxed) {
            return ControlFlow::Break(());
        }
        current.tick();
        ControlFlow::Continue(())
    })?);

    let mut arbiter = IndicatorArbiter::new(state.clone(), driver, config.timing.blink_interval(), Instant::now());
    let flag = stop.clone();
    handles.push(spawn_periodic("indicator", poll, move |now| {
        if flag.load(Ordering::Relaxed) {
            return ControlFlow::Break(());
        }
        if let Err(e) = arbiter.tick(now) {
            tracing::warn!("[LED] write failed, retrying next tick: {:#}", e);
        }
        ControlFlow::Continue(())
    })?);

    match EventLogger::create(
        state,
        &config.logging.csv_path,
        &config.logging.event_path,
        config.timing.sample_log_interval(),
        Instant::now(),
    ) {
        Ok(mut logger) => {
            let flag = stop;
            handles.push(spawn_periodic("event-log", poll, move |now| {
                if flag.load(Ordering::Relaxed) {
                    return ControlFlow::Break(());
                }
                match logger.tick(now, Local::now()) {
                    Ok(_) => ControlFlow::Continue(()),
                    Err(e) => {
                        tracing::error!("[LOG] write failed, logging disabled: {:#}", e);
                        ControlFlow::Break(())
                    }
                }
            })?);
        }
        Err(e) => tracing::error!("[LOG] {:#}; continuing without file logging", e),
    }

    Ok(handles)
}

/// run process B until Ctrl-C
pub async fn run(config: MonitorConfig) -> Result<()> {
    let channel = Arc::new(IpcChannel::attach(&config.ipc).context("IPC init failed")?);
    let driver = Hal::new(&config.indicators).context("indicator init failed")?;
    let state = Arc::new(AnalysisState::new());
    let stop = Arc::new(AtomicBool::new(false));

    spawn_ipc_consumer(channel.clone(), state.clone())?;
    let workers = spawn_workers(&config, state.clone(), Box::new(driver), stop.clone())?;
    spawn_watchdog(
        state.clone(),
        Duration::from_secs(config.timing.stale_feed_warn_secs),
        stop.clone(),
    )?;
    tracing::info!("[ANALYZER] {} workers running", workers.len());

    if config.http.enabled {
        let bind = config.http.analyzer_bind.clone();
        let app = http::analyzer_router(state.clone());
        tokio::spawn(async move {
            tracing::info!("[STARTUP] status api live at http://{}", bind);
            if let Err(e) = http::serve(&bind, app).await {
                tracing::error!("[ERROR] status api error: {:#}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("[ANALYZER] shutting down");

    stop.store(true, Ordering::Relaxed);
    tokio::task::spawn_blocking(move || {
        for handle in workers {
            let _ = handle.join();
        }
    })
    .await?;

    channel.close();
    Ok(())
}
