use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::ApiError;
use crate::memory_db::InsightId;
use crate::shared_state::AppState;

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    #[serde(default)]
    pub min_confidence: f64,
    pub limit: Option<usize>,
}

pub async fn pending_insights(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let insights = state
        .orchestrator
        .store()
        .get_pending_insights(query.min_confidence, query.limit)?;
    Ok(Json(json!({ "count": insights.len(), "insights": insights })))
}

/// Idempotent: an insight already surfaced is returned unchanged.
pub async fn mark_shown(
    State(state): State<AppState>,
    Path(id): Path<InsightId>,
) -> Result<impl IntoResponse, ApiError> {
    let insight = state.orchestrator.store().mark_insight_shown(id)?;
    Ok(Json(insight))
}

/// Run the insight engine now instead of waiting for the next interval.
pub async fn run_insights(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let engine = state.insights.clone();
    let report = tokio::task::spawn_blocking(move || engine.run_once())
        .await
        .map_err(|e| {
            warn!("Insight run task failed: {}", e);
            ApiError {
                status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                message: "Insight run failed".to_string(),
            }
        })??;
    info!("On-demand insight run created {} insight(s)", report.created);
    Ok(Json(report))
}
