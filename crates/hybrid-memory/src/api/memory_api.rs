use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::ApiError;
use crate::error::MemoryError;
use crate::memory_db::{validate_id, ChainDirection, Direction, RelationshipType};
use crate::memos::{RecallRequest, ReflectRequest, RelateRequest, RememberRequest};
use crate::shared_state::AppState;

const MAX_CONTENT_BYTES: usize = 65_536;
const MAX_QUERY_BYTES: usize = 8_192;
const MAX_DEPTH: usize = 10;
const MAX_LIMIT: usize = 200;

fn parse_types(raw: Option<&str>) -> Result<Vec<RelationshipType>, MemoryError> {
    raw.map(|types| {
        types
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()
    })
    .transpose()
    .map(Option::unwrap_or_default)
}

fn check_depth(max_depth: usize) -> Result<(), ApiError> {
    if max_depth == 0 || max_depth > MAX_DEPTH {
        return Err(ApiError::bad_request(format!("max_depth must be within 1..={}", MAX_DEPTH)));
    }
    Ok(())
}

pub async fn remember(
    State(state): State<AppState>,
    Json(payload): Json<RememberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.content.len() > MAX_CONTENT_BYTES {
        return Err(ApiError::bad_request("Content exceeds 64KB limit"));
    }
    if payload.content.contains('\0') {
        return Err(ApiError::bad_request("Content contains illegal null bytes"));
    }

    let outcome = state.orchestrator.remember(payload).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn get_memory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_id(&id)?;
    let memory = state
        .orchestrator
        .store()
        .memories
        .get(&id)?
        .ok_or_else(|| MemoryError::not_found("memory", id.clone()))?;
    let adapter_refs = state.orchestrator.store().memories.adapter_refs(&id)?;
    Ok(Json(json!({
        "memory": memory,
        "adapter_refs": adapter_refs
            .into_iter()
            .map(|(adapter, external_id)| json!({ "adapter": adapter, "external_id": external_id }))
            .collect::<Vec<_>>(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct RelatedQuery {
    pub rel_type: Option<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub min_strength: f64,
    pub limit: Option<usize>,
}

pub async fn get_related(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RelatedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    validate_id(&id)?;
    let rel_type = query.rel_type.as_deref().map(str::parse).transpose()?;
    let related = state.orchestrator.store().get_related(
        &id,
        rel_type,
        query.direction,
        query.min_strength,
        Some(query.limit.unwrap_or(50).min(MAX_LIMIT)),
    )?;
    Ok(Json(json!({ "memory_id": id, "related": related })))
}

#[derive(Debug, Deserialize)]
pub struct ChainQuery {
    #[serde(default)]
    pub direction: ChainDirection,
    /// Comma-separated relationship types; empty follows every type.
    pub types: Option<String>,
    #[serde(default = "default_chain_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub min_strength: f64,
}

fn default_chain_depth() -> usize {
    3
}

pub async fn chain(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ChainQuery>,
) -> Result<impl IntoResponse, ApiError> {
    validate_id(&id)?;
    check_depth(query.max_depth)?;
    let rel_types = parse_types(query.types.as_deref())?;
    let chain = state.orchestrator.store().traverse_chain(
        &id,
        query.direction,
        &rel_types,
        query.max_depth,
        query.min_strength,
    )?;
    Ok(Json(json!({ "start_id": id, "direction": query.direction, "chain": chain })))
}

pub async fn recall(
    State(state): State<AppState>,
    Json(payload): Json<RecallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.query.len() > MAX_QUERY_BYTES {
        return Err(ApiError::bad_request("Query too long (max 8KB)"));
    }
    if payload.limit.is_some_and(|limit| limit > MAX_LIMIT) {
        return Err(ApiError::bad_request(format!("limit must not exceed {}", MAX_LIMIT)));
    }
    let outcome = state.orchestrator.recall(payload).await?;
    Ok(Json(outcome))
}

pub async fn relate(
    State(state): State<AppState>,
    Json(payload): Json<RelateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let edge = state.orchestrator.relate(payload).await?;
    info!(
        "Linked {} -[{}]-> {} ({:.2})",
        edge.source_id, edge.rel_type, edge.target_id, edge.strength
    );
    Ok((StatusCode::CREATED, Json(edge)))
}

#[derive(Debug, Deserialize)]
pub struct PathsQuery {
    pub from: String,
    pub to: String,
    #[serde(default = "default_path_depth")]
    pub max_depth: usize,
}

fn default_path_depth() -> usize {
    4
}

pub async fn paths(
    State(state): State<AppState>,
    Query(query): Query<PathsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    validate_id(&query.from)?;
    validate_id(&query.to)?;
    check_depth(query.max_depth)?;
    let paths = state
        .orchestrator
        .store()
        .find_paths(&query.from, &query.to, query.max_depth)?;
    Ok(Json(json!({ "from": query.from, "to": query.to, "paths": paths })))
}

pub async fn reflect(
    State(state): State<AppState>,
    Json(payload): Json<ReflectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.topic.len() > MAX_QUERY_BYTES {
        return Err(ApiError::bad_request("Topic too long (max 8KB)"));
    }
    let outcome = state.orchestrator.reflect(payload).await?;
    Ok(Json(outcome))
}
