//! PostgreSQL backend.
//!
//! Structured parts of a reading (measurements, flags, alerts, device
//! metadata) are stored as JSONB; scalar columns carry what the scans filter
//! and order on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, TelemetryError};
use crate::models::{
    AlertFact, Capability, DeviceMetadata, Location, Measurements, QualityFlag, Reading, Sensor,
    StoredReading, ThresholdProfile,
};

use super::{ReadingFilter, ReadingStore, SensorRegistry};

// ---

const READING_COLUMNS: &str = "seq, id, sensor_id, ts, lng, lat, measurements, quality_score, \
     quality_category, quality_flags, alerts, device_metadata";

const SENSOR_COLUMNS: &str = "id, name, region, capabilities, thresholds, status, \
     heartbeat_interval_secs, last_heartbeat, next_maintenance_date";

/// Readings and sensors in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ReadingRow {
    seq: i64,
    id: Uuid,
    sensor_id: String,
    ts: DateTime<Utc>,
    lng: Option<f64>,
    lat: Option<f64>,
    measurements: Json<Measurements>,
    quality_score: i16,
    quality_category: String,
    quality_flags: Json<Vec<QualityFlag>>,
    alerts: Json<Vec<AlertFact>>,
    device_metadata: Json<DeviceMetadata>,
}

impl TryFrom<ReadingRow> for StoredReading {
    type Error = TelemetryError;

    fn try_from(row: ReadingRow) -> Result<Self> {
        let quality_score = u8::try_from(row.quality_score).map_err(|_| {
            TelemetryError::Store(format!("reading {} has score {}", row.id, row.quality_score))
        })?;

        Ok(StoredReading {
            seq: row.seq,
            reading: Reading {
                id: row.id,
                sensor_id: row.sensor_id,
                timestamp: row.ts,
                location: row.lng.zip(row.lat).map(|(lng, lat)| Location { lng, lat }),
                measurements: row.measurements.0,
                quality_score,
                quality_category: row.quality_category.parse()?,
                quality_flags: row.quality_flags.0,
                alerts: row.alerts.0,
                device_metadata: row.device_metadata.0,
            },
        })
    }
}

#[derive(sqlx::FromRow)]
struct SensorRow {
    id: String,
    name: String,
    region: Option<String>,
    capabilities: Json<Vec<Capability>>,
    thresholds: Json<ThresholdProfile>,
    status: String,
    heartbeat_interval_secs: i32,
    last_heartbeat: Option<DateTime<Utc>>,
    next_maintenance_date: Option<DateTime<Utc>>,
}

impl TryFrom<SensorRow> for Sensor {
    type Error = TelemetryError;

    fn try_from(row: SensorRow) -> Result<Self> {
        Ok(Sensor {
            status: row.status.parse()?,
            heartbeat_interval_secs: u32::try_from(row.heartbeat_interval_secs).map_err(|_| {
                TelemetryError::Store(format!(
                    "sensor {} has heartbeat interval {}",
                    row.id, row.heartbeat_interval_secs
                ))
            })?,
            id: row.id,
            name: row.name,
            region: row.region,
            capabilities: row.capabilities.0,
            thresholds: row.thresholds.0,
            last_heartbeat: row.last_heartbeat,
            next_maintenance_date: row.next_maintenance_date,
        })
    }
}

fn into_stored(rows: Vec<ReadingRow>) -> Result<Vec<StoredReading>> {
    rows.into_iter().map(StoredReading::try_from).collect()
}

#[async_trait]
impl ReadingStore for PgStore {
    // ---
    async fn append(&self, reading: Reading) -> Result<StoredReading> {
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO readings (
                id, sensor_id, ts, lng, lat, measurements,
                quality_score, quality_category, quality_flags,
                alerts, alert_count, device_metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING seq
            "#,
        )
        .bind(reading.id)
        .bind(&reading.sensor_id)
        .bind(reading.timestamp)
        .bind(reading.location.map(|l| l.lng))
        .bind(reading.location.map(|l| l.lat))
        .bind(Json(&reading.measurements))
        .bind(i16::from(reading.quality_score))
        .bind(reading.quality_category.as_str())
        .bind(Json(&reading.quality_flags))
        .bind(Json(&reading.alerts))
        .bind(reading.alerts.len() as i32)
        .bind(Json(&reading.device_metadata))
        .fetch_one(&self.pool)
        .await?;

        Ok(StoredReading { seq, reading })
    }

    async fn scan(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>> {
        // ---
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {READING_COLUMNS} FROM readings WHERE TRUE"));

        if let Some(sensor_id) = &filter.sensor_id {
            qb.push(" AND sensor_id = ").push_bind(sensor_id.clone());
        }
        if let Some(since) = filter.since {
            qb.push(" AND ts >= ").push_bind(since);
        }
        if let Some(until) = filter.until {
            qb.push(" AND ts < ").push_bind(until);
        }
        if filter.alerts_only {
            qb.push(" AND alert_count > 0");
        }
        qb.push(" ORDER BY seq ASC");

        tracing::debug!(?filter, "Scanning readings");

        let rows: Vec<ReadingRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        into_stored(rows)
    }

    /// Dropping the future abandons the query, so `_cancel` is not polled.
    async fn latest(
        &self,
        sensor_ids: Option<&[String]>,
        _cancel: &CancellationToken,
    ) -> Result<Vec<StoredReading>> {
        // ---
        let rows: Vec<ReadingRow> = match sensor_ids {
            Some(ids) => {
                sqlx::query_as(&format!(
                    "SELECT DISTINCT ON (sensor_id) {READING_COLUMNS} FROM readings \
                     WHERE sensor_id = ANY($1) \
                     ORDER BY sensor_id, ts DESC, seq DESC"
                ))
                .bind(ids.to_vec())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT DISTINCT ON (sensor_id) {READING_COLUMNS} FROM readings \
                     ORDER BY sensor_id, ts DESC, seq DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        into_stored(rows)
    }
}

#[async_trait]
impl SensorRegistry for PgStore {
    // ---
    async fn sensor(&self, sensor_id: &str) -> Result<Sensor> {
        let row: Option<SensorRow> =
            sqlx::query_as(&format!("SELECT {SENSOR_COLUMNS} FROM sensors WHERE id = $1"))
                .bind(sensor_id)
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or_else(|| TelemetryError::SensorNotFound(sensor_id.to_string()))?
            .try_into()
    }

    async fn record_heartbeat(&self, sensor_id: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sensors
               SET last_heartbeat = GREATEST(last_heartbeat, $2)
             WHERE id = $1
            "#,
        )
        .bind(sensor_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TelemetryError::SensorNotFound(sensor_id.to_string()));
        }
        Ok(())
    }

    async fn upsert_sensor(&self, sensor: Sensor) -> Result<()> {
        // ---
        let heartbeat_interval_secs = i32::try_from(sensor.heartbeat_interval_secs).map_err(|_| {
            TelemetryError::Validation(format!(
                "heartbeat_interval_secs {} is too large",
                sensor.heartbeat_interval_secs
            ))
        })?;

        sqlx::query(
            r#"
            INSERT INTO sensors (
                id, name, region, capabilities, thresholds, status,
                heartbeat_interval_secs, last_heartbeat, next_maintenance_date
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name                    = EXCLUDED.name,
                region                  = EXCLUDED.region,
                capabilities            = EXCLUDED.capabilities,
                thresholds              = EXCLUDED.thresholds,
                status                  = EXCLUDED.status,
                heartbeat_interval_secs = EXCLUDED.heartbeat_interval_secs,
                last_heartbeat          = GREATEST(sensors.last_heartbeat, EXCLUDED.last_heartbeat),
                next_maintenance_date   = EXCLUDED.next_maintenance_date
            "#,
        )
        .bind(&sensor.id)
        .bind(&sensor.name)
        .bind(&sensor.region)
        .bind(Json(&sensor.capabilities))
        .bind(Json(&sensor.thresholds))
        .bind(sensor.status.as_str())
        .bind(heartbeat_interval_secs)
        .bind(sensor.last_heartbeat)
        .bind(sensor.next_maintenance_date)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_sensors(&self) -> Result<Vec<Sensor>> {
        let rows: Vec<SensorRow> =
            sqlx::query_as(&format!("SELECT {SENSOR_COLUMNS} FROM sensors ORDER BY id"))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(Sensor::try_from).collect()
    }
}
