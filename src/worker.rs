//! fixed-cadence worker threads.
//!
//! each periodic worker in the analyzer process gets its own named OS thread.
//! the body runs once per interval and receives the tick instant; returning
//! `ControlFlow::Break` ends the thread (only used when a worker cannot go on,
//! e.g. its log file failed).

use std::ops::ControlFlow;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub fn spawn_periodic<F>(name: &str, interval: Duration, mut body: F) -> std::io::Result<JoinHandle<()>>
where
    F: FnMut(Instant) -> ControlFlow<()> + Send + 'static,
{
    let thread_name = name.to_string();
    std::thread::Builder::new().name(thread_name.clone()).spawn(move || {
        tracing::info!("[THREAD] {} started ({:?} cadence)", thread_name, interval);
        let mut deadline = Instant::now();
        loop {
            if body(Instant::now()).is_break() {
                tracing::warn!("[THREAD] {} stopped", thread_name);
                return;
            }

            deadline += interval;
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            } else {
                // overran; restart the schedule instead of bursting to catch up
                deadline = now;
            }
        }
    })
}
