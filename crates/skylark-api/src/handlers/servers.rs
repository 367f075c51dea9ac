//! /servers handlers — chunk listener lifecycle.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use super::{ok, ApiError, ApiState, StatusResponse};

// ── /servers (GET) ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ServersResponse {
    pub server_ports: Vec<u16>,
}

pub async fn handle_list(State(state): State<ApiState>) -> Json<ServersResponse> {
    Json(ServersResponse {
        server_ports: state.gateway.server_ports(),
    })
}

// ── /servers (POST) ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StartServerResponse {
    pub server_port: u16,
}

pub async fn handle_start(
    State(state): State<ApiState>,
) -> Result<Json<StartServerResponse>, ApiError> {
    let server_port = state.gateway.start_server().await?;
    tracing::info!(port = server_port, "chunk server started via API");
    Ok(Json(StartServerResponse { server_port }))
}

// ── /servers/{port} (DELETE) ──────────────────────────────────────────────────

pub async fn handle_stop(
    State(state): State<ApiState>,
    Path(port): Path<u16>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.gateway.stop_server(port).await?;
    tracing::info!(port, "chunk server stopped via API");
    Ok(ok())
}
