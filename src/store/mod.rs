//! Storage contracts for readings and sensors.
//!
//! The core only needs an append-only reading log with a handful of scans,
//! and a sensor registry it can read threshold profiles from and report
//! heartbeats to. Two backends implement both traits:
//!
//! - [`MemoryStore`]: in-process, used by tests and `STORAGE_BACKEND=memory`
//! - [`PgStore`]: PostgreSQL via `sqlx`
//!
//! Required indexes for the PostgreSQL backend live in [`crate::schema`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{Reading, Sensor, SensorMetadata, StoredReading, ThresholdProfile};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

/// Scan filter for [`ReadingStore::scan`].
///
/// The time window is half-open: `since` inclusive, `until` exclusive.
/// Results are returned in write order (ascending `seq`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingFilter {
    pub sensor_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Only readings carrying at least one alert fact.
    pub alerts_only: bool,
}

impl ReadingFilter {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sensor(mut self, sensor_id: &str) -> Self {
        self.sensor_id = Some(sensor_id.to_string());
        self
    }

    pub fn window(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn with_alerts(mut self) -> Self {
        self.alerts_only = true;
        self
    }

    /// Whether a reading passes this filter.
    pub fn matches(&self, reading: &Reading) -> bool {
        self.sensor_id.as_deref().map_or(true, |id| id == reading.sensor_id)
            && self.since.map_or(true, |t| reading.timestamp >= t)
            && self.until.map_or(true, |t| reading.timestamp < t)
            && (!self.alerts_only || !reading.alerts.is_empty())
    }
}

/// Append-only log of scored readings.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Append a reading and return it with its assigned sequence number.
    async fn append(&self, reading: Reading) -> Result<StoredReading>;

    /// All readings matching `filter`, in write order.
    async fn scan(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>>;

    /// Latest reading per sensor (timestamp, then write order), ordered by
    /// sensor id. `None` means every sensor.
    ///
    /// Backends that compute this in process must stop with `Cancelled`
    /// once `cancel` fires.
    async fn latest(
        &self,
        sensor_ids: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredReading>>;
}

/// Sensor identity, thresholds and heartbeat bookkeeping.
#[async_trait]
pub trait SensorRegistry: Send + Sync {
    /// Look up a sensor; fails with `SensorNotFound` if unregistered.
    async fn sensor(&self, sensor_id: &str) -> Result<Sensor>;

    async fn threshold_profile(&self, sensor_id: &str) -> Result<ThresholdProfile> {
        Ok(self.sensor(sensor_id).await?.thresholds)
    }

    async fn sensor_metadata(&self, sensor_id: &str) -> Result<SensorMetadata> {
        Ok(self.sensor(sensor_id).await?.metadata())
    }

    /// Record a heartbeat. `last_heartbeat` never moves backwards.
    async fn record_heartbeat(&self, sensor_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Register a sensor or replace its configuration.
    async fn upsert_sensor(&self, sensor: Sensor) -> Result<()>;

    /// Every registered sensor, ordered by id.
    async fn list_sensors(&self) -> Result<Vec<Sensor>>;
}
