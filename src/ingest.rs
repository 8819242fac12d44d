//! ==============================================================================
//! ingest.rs - process A: network ingestion and snapshot handoff
//! ==============================================================================
//!
//! purpose:
//!     receives per-node telemetry datagrams, folds them into the combined
//!     snapshot and pushes every update through the ipc channel. a second
//!     listener picks up FAULT reports on the control port.
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────┐
//!     │                 ingest process (this file)               │
//!     │  ┌──────────────┐   ┌────────────────┐   ┌────────────┐  │
//!     │  │ data loop    │   │ fault listener │   │ http (opt) │  │
//!     │  │ udp :5005    │   │ udp :6000      │   │ :3000      │  │
//!     │  └──────┬───────┘   └────────────────┘   └────────────┘  │
//!     │         │ decode -> merge                                │
//!     │   ┌─────┴──────────┐                                     │
//!     │   │ SnapshotMerger │ ── send ──> IpcChannel (shm + sem)  │
//!     │   └────────────────┘                                     │
//!     └──────────────────────────────────────────────────────────┘
//!
//! errors:
//!     malformed datagrams are dropped and counted, never logged one by one.
//!     ipc/socket setup failures abort startup before any loop runs.
//!
//! ==============================================================================

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::UdpSocket;

use crate::config::MonitorConfig;
use crate::hal::ModeLeds;
use crate::http;
use crate::ipc::IpcChannel;
use crate::merger::{IngestStats, MergeError, SnapshotMerger};
use crate::packet;

/// receive buffer; larger than a packet so oversized datagrams are detected, not truncated
const RECV_BUF_LEN: usize = 512;

pub async fn bind_udp(addr: &str, port: u16) -> Result<UdpSocket> {
    UdpSocket::bind((addr, port))
        .await
        .with_context(|| format!("failed to bind udp {}:{}", addr, port))
}

/// decode one datagram and merge it; invalid input is only counted
pub fn handle_datagram(merger: &SnapshotMerger, stats: &IngestStats, buf: &[u8]) {
    match packet::decode(buf) {
        Ok(sample) => {
            match merger.merge(&sample) {
                Ok(()) => stats.record_accepted(),
                Err(MergeError::Rejected(_)) => stats.record_malformed(),
                Err(MergeError::Ipc(_)) => {
                    stats.record_accepted();
                    stats.record_ipc_failure();
                }
            }
        }
        Err(_) => stats.record_malformed(),
    }
}

pub async fn run_data_loop(socket: UdpSocket, merger: Arc<SnapshotMerger>, stats: Arc<IngestStats>) {
    let mut buf = [0u8; RECV_BUF_LEN];
    loop {
        match socket.recv(&mut buf).await {
            Ok(n) => handle_datagram(&merger, &stats, &buf[..n]),
            Err(e) => tracing::debug!("[UDP] recv error: {}", e),
        }
    }
}

pub async fn run_fault_listener(socket: UdpSocket, stats: Arc<IngestStats>) {
    let mut buf = [0u8; 256];
    loop {
        let n = match socket.recv(&mut buf).await {
            Ok(n) if n > 0 => n,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("[FAULT] recv error: {}", e);
                continue;
            }
        };

        let line = String::from_utf8_lossy(&buf[..n]);
        if let Some(report) = packet::parse_fault_line(&line) {
            stats.record_fault_report();
            tracing::warn!(node = report.node_id, kind = %report.kind, "[FAULT] Node {} reported {}", report.node_id, report.kind);
        }
    }
}

/// run process A until Ctrl-C
pub async fn run(config: MonitorConfig) -> Result<()> {
    let channel = Arc::new(IpcChannel::attach(&config.ipc).context("IPC init failed")?);
    let mode_leds = ModeLeds::new(&config.indicators).context("mode LED init failed")?;
    let data_socket = bind_udp(&config.network.bind_addr, config.network.data_port).await?;
    let fault_socket = bind_udp(&config.network.bind_addr, config.network.control_port).await?;

    let stats = Arc::new(IngestStats::default());
    let merger = Arc::new(SnapshotMerger::new(channel.clone()));

    tracing::info!(
        "[INGEST] listening for telemetry on {}:{}, faults on :{}",
        config.network.bind_addr,
        config.network.data_port,
        config.network.control_port
    );

    tokio::spawn(run_data_loop(data_socket, merger.clone(), stats.clone()));
    tokio::spawn(run_fault_listener(fault_socket, stats.clone()));

    if config.http.enabled {
        let http_state =
            http::IngestApi::new(stats.clone(), merger.clone(), &config.network, Box::new(mode_leds)).await?;
        let bind = config.http.ingest_bind.clone();
        tokio::spawn(async move {
            tracing::info!("[STARTUP] ingest api live at http://{}", bind);
            if let Err(e) = http::serve(&bind, http::ingest_router(http_state)).await {
                tracing::error!("[ERROR] ingest api error: {:#}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    let counters = stats.counters();
    tracing::info!(?counters, "[INGEST] shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CombinedSnapshot, NodeSample};
    use crate::ipc::{IpcError, SnapshotSink};
    use std::time::Duration;

    struct NullSink;

    impl SnapshotSink for NullSink {
        fn send(&self, _snapshot: &CombinedSnapshot) -> Result<(), IpcError> {
            Ok(())
        }
    }

    fn datagram(node_id: u32, cycle_id: u32) -> [u8; packet::PACKET_LEN] {
        packet::encode(&NodeSample { node_id, cycle_id, vrms: 120.0, irms: 2.5 })
    }

    #[test]
    fn test_handle_datagram_counts_and_merges() {
        let merger = SnapshotMerger::new(Arc::new(NullSink));
        let stats = IngestStats::default();

        handle_datagram(&merger, &stats, &datagram(1, 5));
        handle_datagram(&merger, &stats, &datagram(1, 5)[..10]);
        handle_datagram(&merger, &stats, &datagram(9, 5));

        let c = stats.counters();
        assert_eq!((c.accepted, c.malformed, c.ipc_failures), (1, 2, 0));
        assert_eq!(merger.snapshot().cycle_id[0], 5);
    }

    #[test]
    fn test_ipc_failure_is_counted_not_fatal() {
        let merger = SnapshotMerger::new(Arc::new(IpcChannel::detached()));
        let stats = IngestStats::default();

        handle_datagram(&merger, &stats, &datagram(2, 1));
        handle_datagram(&merger, &stats, &datagram(2, 2));

        let c = stats.counters();
        assert_eq!((c.accepted, c.ipc_failures), (2, 2));
    }

    #[tokio::test]
    async fn test_data_loop_over_udp() {
        let socket = bind_udp("127.0.0.1", 0).await.unwrap();
        let addr = socket.local_addr().unwrap();
        let merger = Arc::new(SnapshotMerger::new(Arc::new(NullSink)));
        let stats = Arc::new(IngestStats::default());
        let task = tokio::spawn(run_data_loop(socket, merger.clone(), stats.clone()));

        let tx = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        tx.send_to(&datagram(3, 41), addr).await.unwrap();
        let mut oversized = datagram(3, 99).to_vec();
        oversized.extend_from_slice(&[0; 4]);
        tx.send_to(&oversized, addr).await.unwrap();
        tx.send_to(&datagram(3, 42), addr).await.unwrap();

        for _ in 0..100 {
            if stats.counters().accepted + stats.counters().malformed == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();

        assert_eq!(stats.counters().malformed, 1);
        assert_eq!(merger.snapshot().cycle_id[2], 42);
    }

    #[tokio::test]
    async fn test_fault_listener_counts_reports() {
        let socket = bind_udp("127.0.0.1", 0).await.unwrap();
        let addr = socket.local_addr().unwrap();
        let stats = Arc::new(IngestStats::default());
        let task = tokio::spawn(run_fault_listener(socket, stats.clone()));

        let tx = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        tx.send_to(b"FAULT|2|OVERCURRENT", addr).await.unwrap();
        tx.send_to(b"FAULT|", addr).await.unwrap();
        tx.send_to(b"hello", addr).await.unwrap();
        tx.send_to(b"FAULT|1|SAG\n", addr).await.unwrap();

        for _ in 0..100 {
            if stats.counters().fault_reports == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();
        assert_eq!(stats.counters().fault_reports, 2);
    }
}
