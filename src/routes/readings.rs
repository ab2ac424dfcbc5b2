//! Reading ingestion and latest-reading endpoints.
//!
//! `POST /readings` scores, checks and stores one measurement; `GET
//! /readings/latest` returns the newest reading per sensor. Handlers stay
//! private and only the subrouter is exported to the gateway (EMBP).

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::{debug, info};

use super::{request_token, ApiResult};
use crate::{IngestOutcome, NewReading, StoredReading, Telemetry, TelemetryError};

// ---

pub fn router() -> Router<Telemetry> {
    // ---
    Router::new()
        .route("/readings", post(ingest))
        .route("/readings/latest", get(latest))
}

/// `POST /readings`
///
/// The body is parsed by hand so that malformed measurements surface as a
/// `validation_error` rather than a generic extractor rejection.
async fn ingest(
    State(telemetry): State<Telemetry>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<IngestOutcome>)> {
    // ---
    let new: NewReading = serde_json::from_value(body)
        .map_err(|e| TelemetryError::Validation(format!("malformed reading: {e}")))?;

    debug!("POST /readings - sensor {}", new.sensor_id);
    let outcome = telemetry.ingest(new).await?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    /// Comma-separated sensor ids; absent means all sensors.
    sensor_ids: Option<String>,
}

/// `GET /readings/latest`
async fn latest(
    State(telemetry): State<Telemetry>,
    Query(params): Query<LatestQuery>,
) -> ApiResult<Json<Vec<StoredReading>>> {
    // ---
    let ids: Option<Vec<String>> = params.sensor_ids.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    });

    let (cancel, _guard) = request_token();
    let readings = telemetry.query_latest(ids.as_deref(), &cancel).await?;

    info!("GET /readings/latest - returning {} readings", readings.len());
    Ok(Json(readings))
}
