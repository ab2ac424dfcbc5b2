//! HTTP gateway for the telemetry service.
//!
//! Each sibling module exports a subrouter; this gateway merges them and
//! attaches the shared [`Telemetry`] state, so `main.rs` never needs to know
//! about individual endpoints (EMBP).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, warn};

use crate::{Telemetry, TelemetryError};

mod analytics;
mod health;
mod readings;
mod sensors;
mod ws;

// ---

pub fn router(telemetry: Telemetry) -> Router {
    // ---
    Router::new()
        .merge(readings::router())
        .merge(analytics::router())
        .merge(sensors::router())
        .merge(ws::router())
        .merge(health::router())
        .with_state(telemetry)
}

/// Error wrapper that renders a [`TelemetryError`] as a JSON response.
#[derive(Debug)]
pub struct ApiError(TelemetryError);

impl From<TelemetryError> for ApiError {
    fn from(e: TelemetryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let status = match &self.0 {
            TelemetryError::Validation(_)
            | TelemetryError::InvalidGranularity(_)
            | TelemetryError::InvalidDimension(_) => StatusCode::BAD_REQUEST,
            TelemetryError::SensorNotFound(_) => StatusCode::NOT_FOUND,
            TelemetryError::FutureTimestamp { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            TelemetryError::QueryTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            TelemetryError::Cancelled | TelemetryError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }

        let body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Cancellation token tied to the lifetime of a request handler.
///
/// Keep the guard alive for the duration of the handler. If the client goes
/// away, axum drops the handler future, the guard drops with it and any
/// running aggregation is cancelled.
pub fn request_token() -> (CancellationToken, DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}
