// src/routes/health.rs
//! API health check endpoint for the telemetry service.
//!
//! This module defines the `/health` route used by container orchestrators
//! and CI pipelines to verify that the service is running and able to
//! respond to HTTP requests. It follows the Explicit Module Boundary Pattern
//! (EMBP): the handler stays private, the gateway (`mod.rs`) only sees the
//! subrouter.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::Telemetry;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    /// Currently connected real-time subscribers.
    subscribers: usize,
}

/// Handle `GET /health`.
///
/// Does not touch the store.
async fn health(State(telemetry): State<Telemetry>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        subscribers: telemetry.events().subscriber_count(),
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<Telemetry> {
    Router::new().route("/health", get(health))
}
