//! Dashboard queries: series, alert trend, alert listing, rollups, summary.
//!
//! Granularity, dimension and severity are parsed before the store is
//! touched, so a bad request never starts a scan.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use super::{request_token, ApiResult};
use crate::aggregate::{
    AlertEvent, AlertFilter, AlertTrendBucket, Dimension, Granularity, RollupEntry, Summary,
    TimeBucket,
};
use crate::{SeverityTier, Telemetry, TelemetryError};

// ---

/// Alert listing cap applied when the request carries no `limit`.
const DEFAULT_ALERT_LIMIT: usize = 1000;

pub fn router() -> Router<Telemetry> {
    // ---
    Router::new()
        .route("/sensors/{id}/series", get(series))
        .route("/alerts", get(alerts))
        .route("/alerts/trend", get(alert_trend))
        .route("/rollups/{dimension}", get(rollup))
        .route("/summary", get(summary))
}

#[derive(Debug, Deserialize)]
struct BucketedQuery {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: String,
}

async fn series(
    State(telemetry): State<Telemetry>,
    Path(sensor_id): Path<String>,
    Query(params): Query<BucketedQuery>,
) -> ApiResult<Json<Vec<TimeBucket>>> {
    // ---
    let granularity: Granularity = params.granularity.parse()?;
    let (cancel, _guard) = request_token();

    let buckets = telemetry
        .query_series(&sensor_id, params.start, params.end, granularity, &cancel)
        .await?;

    info!("GET /sensors/{}/series - {} buckets", sensor_id, buckets.len());
    Ok(Json(buckets))
}

async fn alert_trend(
    State(telemetry): State<Telemetry>,
    Query(params): Query<BucketedQuery>,
) -> ApiResult<Json<Vec<AlertTrendBucket>>> {
    // ---
    let granularity: Granularity = params.granularity.parse()?;
    let (cancel, _guard) = request_token();

    let trend = telemetry
        .query_alert_trend(params.start, params.end, granularity, &cancel)
        .await?;

    Ok(Json(trend))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    sensor_id: Option<String>,
    severity: Option<String>,
    limit: Option<usize>,
}

impl AlertsQuery {
    fn filter(&self) -> Result<AlertFilter, TelemetryError> {
        // ---
        let severity = self
            .severity
            .as_deref()
            .map(str::parse::<SeverityTier>)
            .transpose()?;

        Ok(AlertFilter {
            sensor_id: self.sensor_id.clone(),
            severity,
            limit: Some(self.limit.unwrap_or(DEFAULT_ALERT_LIMIT)),
        })
    }
}

async fn alerts(
    State(telemetry): State<Telemetry>,
    Query(params): Query<AlertsQuery>,
) -> ApiResult<Json<Vec<AlertEvent>>> {
    // ---
    let filter = params.filter()?;

    let (cancel, _guard) = request_token();
    let events = telemetry
        .list_alerts(params.start, params.end, filter, &cancel)
        .await?;

    info!("GET /alerts - returning {} alerts", events.len());
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
struct RollupQuery {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: Option<usize>,
}

async fn rollup(
    State(telemetry): State<Telemetry>,
    Path(dimension): Path<String>,
    Query(params): Query<RollupQuery>,
) -> ApiResult<Json<Vec<RollupEntry>>> {
    // ---
    let dimension: Dimension = dimension.parse()?;
    let (cancel, _guard) = request_token();

    let entries = telemetry
        .query_rollup(dimension, params.start, params.end, params.limit, &cancel)
        .await?;

    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
struct SummaryQuery {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    sensor_id: Option<String>,
}

async fn summary(
    State(telemetry): State<Telemetry>,
    Query(params): Query<SummaryQuery>,
) -> ApiResult<Json<Summary>> {
    // ---
    let (cancel, _guard) = request_token();
    let summary = telemetry
        .query_summary(params.sensor_id.as_deref(), params.start, params.end, &cancel)
        .await?;

    Ok(Json(summary))
}
