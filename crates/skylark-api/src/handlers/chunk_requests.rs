//! /chunk_requests handlers — intake and queue views.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use skylark_core::ChunkRequest;
use skylark_services::ChunkRequestQueues;

use super::{ok, ApiError, ApiState, StatusResponse};

/// A POST body is either one request object or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<ChunkRequest>),
    One(Box<ChunkRequest>),
}

// ── /chunk_requests (GET) ─────────────────────────────────────────────────────

pub async fn handle_queues(State(state): State<ApiState>) -> Json<ChunkRequestQueues> {
    Json(state.gateway.chunk_requests())
}

// ── /chunk_requests (POST) ────────────────────────────────────────────────────

pub async fn handle_submit(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<StatusResponse>, ApiError> {
    let requests = match serde_json::from_slice::<OneOrMany>(&body) {
        Ok(OneOrMany::Many(list)) => list,
        Ok(OneOrMany::One(one)) => vec![*one],
        Err(e) => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                format!("malformed chunk request: {e}"),
            ))
        }
    };
    let count = requests.len();
    state.gateway.add_chunk_requests(requests)?;
    tracing::info!(count, "chunk requests registered");
    Ok(ok())
}

// ── /chunk_requests/{id} (GET) ────────────────────────────────────────────────

pub async fn handle_get(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Json<ChunkRequest>, ApiError> {
    state
        .gateway
        .chunk_request(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("chunk request {id}")))
}
