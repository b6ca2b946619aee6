//! /status and /version handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use dhtscrape_core::version::USER_AGENT;
use dhtscrape_services::StatsSnapshot;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: USER_AGENT,
        stats: state.stats.snapshot(),
    })
}

// ── /version ─────────────────────────────────────────────────────────────────

pub async fn handle_version() -> &'static str {
    USER_AGENT
}
