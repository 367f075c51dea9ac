//! /chunks handlers — per-chunk state snapshots.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;

use skylark_services::ChunkSnapshot;

use super::{ok, ApiError, ApiState, StatusResponse};

// ── /chunks (GET) ─────────────────────────────────────────────────────────────

/// chunk_id → snapshot.
pub async fn handle_list(State(state): State<ApiState>) -> Json<BTreeMap<u64, ChunkSnapshot>> {
    Json(
        state
            .gateway
            .chunks()
            .into_iter()
            .map(|snap| (snap.chunk_id, snap))
            .collect(),
    )
}

// ── /chunks/{id} (GET, DELETE) ────────────────────────────────────────────────

pub async fn handle_get(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Json<ChunkSnapshot>, ApiError> {
    state
        .gateway
        .chunk(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("chunk {id}")))
}

/// Forget a chunk that reached a terminal state.
pub async fn handle_remove(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.gateway.remove_chunk(id)?;
    Ok(ok())
}
