//! HTTP API handlers — exposes gateway state as JSON.

pub mod chunk_requests;
pub mod chunks;
pub mod servers;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use skylark_services::{ControlError, GatewayControl, StoreError};

#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<dyn GatewayControl>,
}

impl ApiState {
    pub fn new(gateway: Arc<dyn GatewayControl>) -> Self {
        Self { gateway }
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

pub(crate) fn ok() -> Json<StatusResponse> {
    Json(StatusResponse { status: "ok" })
}

/// An error rendered as `{"error": "..."}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} not found"))
    }
}

impl From<ControlError> for ApiError {
    fn from(e: ControlError) -> Self {
        let status = match &e {
            ControlError::PortNotFound(_) | ControlError::Invalid(_) => StatusCode::BAD_REQUEST,
            ControlError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ControlError::Store(StoreError::Duplicate(_) | StoreError::InFlight { .. }) => {
                StatusCode::CONFLICT
            }
            ControlError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ControlError::Store(StoreError::InvalidTransition { .. }) | ControlError::Bind(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %e, "control request failed");
        }
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}
