//! gridwatch: multi-node voltage/current fault monitor.
//!
//! Two cooperating processes share one crate:
//!
//! - `ingest` receives node telemetry over UDP and publishes a combined
//!   snapshot through shared memory.
//! - `analyzer` classifies every snapshot, drives the indicator LEDs and
//!   writes the sample and fault event logs.

pub mod analyzer;
pub mod command;
pub mod config;
pub mod current;
pub mod domain;
pub mod eventlog;
pub mod hal;
pub mod http;
pub mod indicator;
pub mod ingest;
pub mod ipc;
pub mod merger;
pub mod packet;
pub mod state;
pub mod telemetry;
pub mod voltage;
pub mod worker;
