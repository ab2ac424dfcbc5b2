//! In-process backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::aggregate;
use crate::error::{Result, TelemetryError};
use crate::models::{Reading, Sensor, StoredReading};

use super::{ReadingFilter, ReadingStore, SensorRegistry};

// ---

/// Readings and sensors held in memory.
///
/// Readings live in a single vector in write order; a reading's `seq` is
/// its 1-based position in that vector.
#[derive(Debug, Default)]
pub struct MemoryStore {
    readings: Arc<RwLock<Vec<StoredReading>>>,
    sensors: RwLock<BTreeMap<String, Sensor>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    // ---
    async fn append(&self, reading: Reading) -> Result<StoredReading> {
        let mut readings = self.readings.write().await;
        let stored = StoredReading {
            seq: readings.len() as i64 + 1,
            reading,
        };
        readings.push(stored.clone());
        Ok(stored)
    }

    async fn scan(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>> {
        let readings = self.readings.read().await;
        Ok(readings
            .iter()
            .filter(|r| filter.matches(&r.reading))
            .cloned()
            .collect())
    }

    /// Walks the whole log on a blocking thread, checking `cancel` as it goes.
    async fn latest(
        &self,
        sensor_ids: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredReading>> {
        // ---
        let readings = Arc::clone(&self.readings);
        let sensor_ids = sensor_ids.map(<[String]>::to_vec);
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            let readings = readings.blocking_read();
            aggregate::latest_per_sensor(&readings, sensor_ids.as_deref(), &cancel)
        })
        .await
        .map_err(|e| TelemetryError::Store(format!("latest task failed: {e}")))?
    }
}

#[async_trait]
impl SensorRegistry for MemoryStore {
    // ---
    async fn sensor(&self, sensor_id: &str) -> Result<Sensor> {
        self.sensors
            .read()
            .await
            .get(sensor_id)
            .cloned()
            .ok_or_else(|| TelemetryError::SensorNotFound(sensor_id.to_string()))
    }

    async fn record_heartbeat(&self, sensor_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut sensors = self.sensors.write().await;
        let sensor = sensors
            .get_mut(sensor_id)
            .ok_or_else(|| TelemetryError::SensorNotFound(sensor_id.to_string()))?;
        if sensor.last_heartbeat.map_or(true, |last| at > last) {
            sensor.last_heartbeat = Some(at);
        }
        Ok(())
    }

    async fn upsert_sensor(&self, mut sensor: Sensor) -> Result<()> {
        let mut sensors = self.sensors.write().await;
        if let Some(existing) = sensors.get(&sensor.id) {
            sensor.last_heartbeat = sensor.last_heartbeat.max(existing.last_heartbeat);
        }
        sensors.insert(sensor.id.clone(), sensor);
        Ok(())
    }

    async fn list_sensors(&self) -> Result<Vec<Sensor>> {
        Ok(self.sensors.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{DeviceMetadata, Measurements, QualityCategory};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn reading(sensor: &str, hour: u32, alerts: bool) -> Reading {
        Reading {
            id: Uuid::new_v4(),
            sensor_id: sensor.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap(),
            location: None,
            measurements: Measurements::new(),
            quality_score: 100,
            quality_category: QualityCategory::Excellent,
            quality_flags: Vec::new(),
            alerts: if alerts {
                vec![crate::models::AlertFact {
                    alert_type: "temperature_high".into(),
                    measured_value: 40.0,
                    threshold_value: 35.0,
                }]
            } else {
                Vec::new()
            },
            device_metadata: DeviceMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_seq() {
        // ---
        let store = MemoryStore::new();
        let a = store.append(reading("s1", 1, false)).await.unwrap();
        let b = store.append(reading("s1", 1, false)).await.unwrap();
        assert!(b.seq > a.seq);
        assert_eq!(store.scan(&ReadingFilter::new()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_latest_per_sensor() {
        // ---
        let store = MemoryStore::new();
        store.append(reading("s1", 1, false)).await.unwrap();
        store.append(reading("s1", 3, false)).await.unwrap();
        store.append(reading("s2", 2, false)).await.unwrap();

        let latest = store.latest(None, &CancellationToken::new()).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].seq, 2);

        let ids = vec!["s2".to_string()];
        let only = store
            .latest(Some(ids.as_slice()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].reading.sensor_id, "s2");
    }

    #[tokio::test]
    async fn test_latest_stops_when_cancelled() {
        // ---
        let store = MemoryStore::new();
        store.append(reading("s1", 1, false)).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            store.latest(None, &cancel).await,
            Err(TelemetryError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_scan_filters() {
        // ---
        let store = MemoryStore::new();
        store.append(reading("s1", 1, false)).await.unwrap();
        store.append(reading("s1", 2, true)).await.unwrap();
        store.append(reading("s2", 3, true)).await.unwrap();

        let start = Utc.with_ymd_and_hms(2025, 1, 1, 1, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap();

        let s1 = store.scan(&ReadingFilter::new().sensor("s1")).await.unwrap();
        assert_eq!(s1.len(), 2);

        let windowed = store.scan(&ReadingFilter::new().window(start, end)).await.unwrap();
        assert_eq!(windowed.len(), 2);

        let alerting = store
            .scan(&ReadingFilter::new().window(start, end).with_alerts())
            .await
            .unwrap();
        assert_eq!(alerting.len(), 1);
        assert_eq!(alerting[0].reading.sensor_id, "s1");
    }

    #[tokio::test]
    async fn test_unknown_sensor() {
        // ---
        let store = MemoryStore::new();
        assert!(matches!(
            store.sensor("ghost").await,
            Err(TelemetryError::SensorNotFound(_))
        ));
        assert!(store.record_heartbeat("ghost", Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_never_moves_backwards() {
        // ---
        let store = MemoryStore::new();
        store.upsert_sensor(Sensor::new("s1")).await.unwrap();

        let later = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2025, 1, 1, 11, 0, 0).unwrap();
        store.record_heartbeat("s1", later).await.unwrap();
        store.record_heartbeat("s1", earlier).await.unwrap();

        let meta = store.sensor_metadata("s1").await.unwrap();
        assert_eq!(meta.last_heartbeat, Some(later));

        // Re-registering keeps the heartbeat.
        store.upsert_sensor(Sensor::new("s1")).await.unwrap();
        assert_eq!(store.sensor("s1").await.unwrap().last_heartbeat, Some(later));
    }
}
