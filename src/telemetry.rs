//! Ingestion and query facade.
//!
//! [`Telemetry`] wires the pure scoring, alert and aggregation functions to
//! a [`ReadingStore`], a [`SensorRegistry`] and the real-time [`EventHub`].
//! It is cheap to clone and holds no mutable state of its own, so
//! concurrent ingestions and queries never contend on it.
//!
//! Aggregation queries run under the configured timeout and a caller
//! supplied [`CancellationToken`]. A query that times out or is cancelled
//! returns an error; partial results are never returned.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::{
    self, AlertEvent, AlertFilter, AlertTrendBucket, Dimension, Granularity, RollupEntry,
    Summary, TimeBucket, UNASSIGNED_REGION,
};
use crate::alerts;
use crate::error::{Result, TelemetryError};
use crate::events::EventHub;
use crate::health::{self, SensorHealth};
use crate::models::{IngestOutcome, NewReading, Reading, Sensor, StoredReading};
use crate::quality;
use crate::store::{MemoryStore, ReadingFilter, ReadingStore, SensorRegistry};

// ---

/// Default deadline for aggregation queries.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// A registered sensor together with its computed health.
#[derive(Debug, Clone, Serialize)]
pub struct SensorView {
    #[serde(flatten)]
    pub sensor: Sensor,
    pub health: SensorHealth,
}

/// The telemetry service.
#[derive(Clone)]
pub struct Telemetry {
    readings: Arc<dyn ReadingStore>,
    sensors: Arc<dyn SensorRegistry>,
    events: EventHub,
    query_timeout: Duration,
}

impl Telemetry {
    // ---
    pub fn new(
        readings: Arc<dyn ReadingStore>,
        sensors: Arc<dyn SensorRegistry>,
        events: EventHub,
        query_timeout: Duration,
    ) -> Self {
        Self {
            readings,
            sensors,
            events,
            query_timeout,
        }
    }

    /// A service backed by a fresh [`MemoryStore`].
    pub fn in_memory(events: EventHub, query_timeout: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store, events, query_timeout)
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    // --- ingestion

    /// Score, check and store a measurement taken now or earlier.
    pub async fn ingest(&self, new: NewReading) -> Result<IngestOutcome> {
        self.ingest_at(new, Utc::now()).await
    }

    /// [`Telemetry::ingest`] with an explicit current time.
    ///
    /// Rejections happen before anything is written: malformed input,
    /// timestamps after `now`, and unregistered sensors. Once the reading
    /// is stored, the sensor's heartbeat is bumped to `now` and the reading
    /// and its alerts are pushed to real-time subscribers. A failed
    /// heartbeat update is logged and does not fail the ingestion.
    pub async fn ingest_at(&self, new: NewReading, now: DateTime<Utc>) -> Result<IngestOutcome> {
        // ---
        new.validate()?;

        let timestamp = new.timestamp.unwrap_or(now);
        if timestamp > now {
            return Err(TelemetryError::FutureTimestamp { timestamp, now });
        }

        let profile = self.sensors.threshold_profile(&new.sensor_id).await?;

        let assessment = quality::assess(&new.measurements, &new.device_metadata);
        let alerts = alerts::derive_alerts(&new.measurements, &profile);

        let reading = Reading {
            id: Uuid::new_v4(),
            sensor_id: new.sensor_id,
            timestamp,
            location: new.location,
            measurements: new.measurements,
            quality_score: assessment.score,
            quality_category: assessment.category,
            quality_flags: assessment.flags,
            alerts,
            device_metadata: new.device_metadata,
        };

        let stored = self.readings.append(reading).await?;
        let r = &stored.reading;

        info!(
            sensor_id = %r.sensor_id,
            reading_id = %r.id,
            score = r.quality_score,
            category = %r.quality_category,
            alerts = r.alerts.len(),
            "Reading ingested"
        );

        if let Err(e) = self.sensors.record_heartbeat(&r.sensor_id, now).await {
            warn!(sensor_id = %r.sensor_id, error = %e, "Failed to record heartbeat");
        }

        self.events.publish_reading(&stored);

        Ok(IngestOutcome {
            reading_id: r.id,
            quality_score: r.quality_score,
            quality_category: r.quality_category,
            alerts: r.alerts.clone(),
        })
    }

    // --- aggregation

    /// Per-sensor time series over `[start, end)`.
    pub async fn query_series(
        &self,
        sensor_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
        cancel: &CancellationToken,
    ) -> Result<Vec<TimeBucket>> {
        // ---
        debug!("query_series sensor={} [{}, {}) by {}", sensor_id, start, end, granularity);

        let filter = ReadingFilter::new().sensor(sensor_id).window(start, end);
        let sensor_id = sensor_id.to_string();
        self.run_query(cancel, filter, move |readings, token| {
            aggregate::series(&readings, &sensor_id, start, end, granularity, &token)
        })
        .await
    }

    /// Latest reading per sensor; `None` means every sensor.
    pub async fn query_latest(
        &self,
        sensor_ids: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredReading>> {
        // ---
        debug!("query_latest sensors={:?}", sensor_ids);

        let token = cancel.child_token();
        let _guard = token.clone().drop_guard();
        self.with_deadline(&token, self.readings.latest(sensor_ids, &token)).await
    }

    /// Alert counts per bucket, split by severity tier.
    pub async fn query_alert_trend(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
        cancel: &CancellationToken,
    ) -> Result<Vec<AlertTrendBucket>> {
        // ---
        debug!("query_alert_trend [{}, {}) by {}", start, end, granularity);

        let filter = ReadingFilter::new().window(start, end).with_alerts();
        self.run_query(cancel, filter, move |readings, token| {
            aggregate::alert_trend(&readings, start, end, granularity, &token)
        })
        .await
    }

    /// Readings in `[start, end)` grouped by region or sensor.
    pub async fn query_rollup(
        &self,
        dimension: Dimension,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RollupEntry>> {
        // ---
        debug!("query_rollup {:?} [{}, {}) limit={:?}", dimension, start, end, limit);

        let regions: HashMap<String, String> = match dimension {
            Dimension::Sensor => HashMap::new(),
            Dimension::Region => self
                .with_deadline(cancel, self.sensors.list_sensors())
                .await?
                .into_iter()
                .filter_map(|s| s.region.map(|region| (s.id, region)))
                .collect(),
        };

        let filter = ReadingFilter::new().window(start, end);
        self.run_query(cancel, filter, move |readings, token| {
            let key_of = |r: &Reading| match dimension {
                Dimension::Sensor => r.sensor_id.clone(),
                Dimension::Region => regions
                    .get(&r.sensor_id)
                    .cloned()
                    .unwrap_or_else(|| UNASSIGNED_REGION.to_string()),
            };
            aggregate::rollup(&readings, start, end, key_of, limit, &token)
        })
        .await
    }

    /// Overview of `[start, end)`, optionally for one sensor.
    pub async fn query_summary(
        &self,
        sensor_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Summary> {
        // ---
        let mut filter = ReadingFilter::new().window(start, end);
        if let Some(id) = sensor_id {
            filter = filter.sensor(id);
        }
        let sensor_id = sensor_id.map(str::to_string);
        self.run_query(cancel, filter, move |readings, token| {
            aggregate::summarize(&readings, sensor_id.as_deref(), start, end, &token)
        })
        .await
    }

    /// Alert events in `[start, end)`, newest first.
    pub async fn list_alerts(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: AlertFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<AlertEvent>> {
        // ---
        let mut scan = ReadingFilter::new().window(start, end).with_alerts();
        if let Some(id) = &filter.sensor_id {
            scan = scan.sensor(id);
        }
        self.run_query(cancel, scan, move |readings, token| {
            aggregate::alert_events(&readings, start, end, &filter, &token)
        })
        .await
    }

    // --- sensors

    /// Register a sensor or replace its configuration.
    pub async fn register_sensor(&self, sensor: Sensor) -> Result<()> {
        sensor.validate()?;
        info!(sensor_id = %sensor.id, "Registering sensor");
        self.sensors.upsert_sensor(sensor).await
    }

    pub async fn sensor_health(&self, sensor_id: &str, now: DateTime<Utc>) -> Result<SensorHealth> {
        let meta = self.sensors.sensor_metadata(sensor_id).await?;
        Ok(health::assess(&meta, now))
    }

    pub async fn list_sensors(&self, now: DateTime<Utc>) -> Result<Vec<SensorView>> {
        let sensors = self.sensors.list_sensors().await?;
        Ok(sensors
            .into_iter()
            .map(|sensor| SensorView {
                health: health::assess(&sensor.metadata(), now),
                sensor,
            })
            .collect())
    }

    // --- plumbing

    /// Await `fut` under the query timeout and the caller's token.
    async fn with_deadline<T, F>(&self, cancel: &CancellationToken, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TelemetryError::Cancelled),
            res = tokio::time::timeout(self.query_timeout, fut) => {
                res.map_err(|_| TelemetryError::QueryTimeout(self.query_timeout))?
            }
        }
    }

    /// Scan with `filter`, then run `compute` on a blocking thread.
    ///
    /// The compute step gets a child token that is cancelled when this call
    /// returns for any reason, so a timed-out computation stops at its next
    /// checkpoint instead of running to completion.
    async fn run_query<T, F>(
        &self,
        cancel: &CancellationToken,
        filter: ReadingFilter,
        compute: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Vec<StoredReading>, CancellationToken) -> Result<T> + Send + 'static,
    {
        // ---
        let token = cancel.child_token();
        let _guard = token.clone().drop_guard();

        let work = async {
            let readings = self.readings.scan(&filter).await?;
            debug!("Aggregating over {} readings", readings.len());

            let task_token = token.clone();
            tokio::task::spawn_blocking(move || compute(readings, task_token))
                .await
                .map_err(|e| TelemetryError::Store(format!("aggregation task failed: {e}")))?
        };

        self.with_deadline(&token, work).await
    }
}
