use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

use super::ApiError;
use crate::memos::StatusReport;
use crate::shared_state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime().as_secs(),
    })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub report: StatusReport,
    pub uptime_seconds: u64,
}

/// Adapter health (cached), store statistics and mirror failures.
pub async fn status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = state.orchestrator.status().await?;
    Ok(Json(StatusResponse {
        report,
        uptime_seconds: state.uptime().as_secs(),
    }))
}
