//! Sensor registry endpoints.
//!
//! Registration, listing with computed health, and a per-sensor health
//! check. Handlers stay private; the gateway (`mod.rs`) only sees the
//! subrouter (EMBP).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;

use super::ApiResult;
use crate::{Sensor, SensorHealth, SensorView, Telemetry, TelemetryError};

// ---

pub fn router() -> Router<Telemetry> {
    // ---
    Router::new()
        .route("/sensors", get(list).post(register))
        .route("/sensors/{id}/health", get(health))
}

/// `POST /sensors` registers a sensor or replaces its configuration.
async fn register(
    State(telemetry): State<Telemetry>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<StatusCode> {
    // ---
    let sensor: Sensor = serde_json::from_value(body)
        .map_err(|e| TelemetryError::Validation(format!("malformed sensor: {e}")))?;
    telemetry.register_sensor(sensor).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list(State(telemetry): State<Telemetry>) -> ApiResult<Json<Vec<SensorView>>> {
    Ok(Json(telemetry.list_sensors(Utc::now()).await?))
}

async fn health(
    State(telemetry): State<Telemetry>,
    Path(sensor_id): Path<String>,
) -> ApiResult<Json<SensorHealth>> {
    Ok(Json(telemetry.sensor_health(&sensor_id, Utc::now()).await?))
}
