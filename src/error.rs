//! Error taxonomy for the telemetry core.
//!
//! Validation failures are raised before any scoring happens, so a reading
//! is either written in full or not at all. Store failures are surfaced as
//! transient errors and are never retried here; retry policy belongs to the
//! caller.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Result type for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors produced by ingestion and aggregation.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Malformed or out-of-domain input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The sensor is not registered.
    #[error("Sensor not found: {0}")]
    SensorNotFound(String),

    /// The reading claims to have been taken after the current time.
    #[error("Reading timestamp {timestamp} is after current time {now}")]
    FutureTimestamp {
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// Unknown aggregation granularity.
    #[error("Invalid granularity: {0} (expected hour, day, week or month)")]
    InvalidGranularity(String),

    /// Unknown rollup dimension.
    #[error("Invalid rollup dimension: {0} (expected region or sensor)")]
    InvalidDimension(String),

    /// An aggregation query ran past its deadline.
    #[error("Query timed out after {0:?}")]
    QueryTimeout(Duration),

    /// An aggregation query was cancelled by its caller.
    #[error("Query cancelled")]
    Cancelled,

    /// Backing store failure (transient).
    #[error("Store error: {0}")]
    Store(String),
}

impl TelemetryError {
    /// Short machine-readable error kind, used in API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::SensorNotFound(_) => "sensor_not_found",
            Self::FutureTimestamp { .. } => "future_timestamp",
            Self::InvalidGranularity(_) => "invalid_granularity",
            Self::InvalidDimension(_) => "invalid_dimension",
            Self::QueryTimeout(_) => "query_timeout",
            Self::Cancelled => "cancelled",
            Self::Store(_) => "store_unavailable",
        }
    }
}

impl From<sqlx::Error> for TelemetryError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(format!("serialization: {e}"))
    }
}
