//! ==============================================================================
//! http.rs - optional status and control endpoints
//! ==============================================================================
//!
//! purpose:
//!     a thin axum surface over the two processes. disabled unless
//!     `[http] enabled = true`; nothing in the data path depends on it.
//!
//! endpoints:
//!     analyzer  GET  /api/status                    latest DerivedView as json
//!     ingest    GET  /api/stats                     counters, snapshot, selected mode
//!     ingest    POST /api/command?cmd=ack|mode|send&node=&mode=&on=
//!
//! relationships:
//!     - reads: state.rs (analyzer), merger.rs (ingest)
//!     - writes: command.rs (CommandPanel: broadcast + mode LEDs)
//!
//! ==============================================================================

use anyhow::Result;
use axum::{
    extract::{Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::command::{Command, CommandPanel, CommandSender, OperatingMode, Target};
use crate::config::NetworkConfig;
use crate::domain::{CombinedSnapshot, NUM_NODES};
use crate::hal::ModeDriver;
use crate::merger::{IngestCounters, IngestStats, SnapshotMerger};
use crate::state::{AnalysisState, DerivedView};

pub async fn serve(bind: &str, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ==============================================================================
// analyzer side
// ==============================================================================

pub fn analyzer_router(state: Arc<AnalysisState>) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn status_handler(State(state): State<Arc<AnalysisState>>) -> Json<DerivedView> {
    Json(state.read_derived())
}

// ==============================================================================
// ingest side
// ==============================================================================

#[derive(Clone)]
pub struct IngestApi {
    stats: Arc<IngestStats>,
    merger: Arc<SnapshotMerger>,
    commands: Arc<CommandPanel>,
}

impl IngestApi {
    pub async fn new(
        stats: Arc<IngestStats>,
        merger: Arc<SnapshotMerger>,
        network: &NetworkConfig,
        mode_leds: Box<dyn ModeDriver>,
    ) -> Result<Self> {
        let sender = CommandSender::bind(&network.broadcast_addr, network.control_port).await?;
        Ok(Self {
            stats,
            merger,
            commands: Arc::new(CommandPanel::new(sender, mode_leds)),
        })
    }
}

#[derive(Serialize)]
struct StatsResponse {
    counters: IngestCounters,
    snapshot: CombinedSnapshot,
    mode: &'static str,
}

pub fn ingest_router(api: IngestApi) -> Router {
    Router::new()
        .route("/api/stats", get(stats_handler))
        .route("/api/command", post(command_handler))
        .layer(CorsLayer::permissive())
        .with_state(api)
}

async fn stats_handler(State(api): State<IngestApi>) -> Json<StatsResponse> {
    Json(StatsResponse {
        counters: api.stats.counters(),
        snapshot: api.merger.snapshot(),
        mode: api.commands.current_mode().as_str(),
    })
}

/// command params
#[derive(Debug, Default, Deserialize)]
pub struct CommandParams {
    pub cmd: String,
    /// 1-based node id; absent or -1 means every node
    pub node: Option<i64>,
    pub mode: Option<String>,
    pub on: Option<String>,
}

pub fn parse_command(params: &CommandParams) -> Result<Command, String> {
    let target = match params.node {
        None | Some(-1) => Target::All,
        Some(n) if n >= 1 && n <= NUM_NODES as i64 => Target::Node(n as u32),
        Some(n) => return Err(format!("node {} out of range", n)),
    };

    match params.cmd.as_str() {
        "ack" => Ok(Command::Ack(target)),
        "mode" => {
            let raw = params.mode.as_deref().ok_or("missing mode")?;
            let mode = OperatingMode::parse(raw).ok_or_else(|| format!("unknown mode {}", raw))?;
            Ok(Command::SetMode(mode, target))
        }
        "send" => {
            let on = match params.on.as_deref().map(str::to_ascii_lowercase).as_deref() {
                Some("on" | "1" | "true") => true,
                Some("off" | "0" | "false") => false,
                _ => return Err("on must be on|off".to_string()),
            };
            Ok(Command::SetSend(on, target))
        }
        other => Err(format!("unknown cmd {}", other)),
    }
}

/// POST /api/command?cmd=ack|mode|send
async fn command_handler(
    State(api): State<IngestApi>,
    Query(params): Query<CommandParams>,
) -> Json<serde_json::Value> {
    let command = match parse_command(&params) {
        Ok(c) => c,
        Err(message) => return Json(serde_json::json!({"status": "error", "message": message})),
    };

    match api.commands.dispatch(&command).await {
        Ok(()) => Json(serde_json::json!({"status": "ok", "sent": command.to_string()})),
        Err(e) => {
            tracing::error!("[CMD] {:#}", e);
            Json(serde_json::json!({"status": "error", "message": format!("{:#}", e)}))
        }
    }
}
