//! Record and type definitions for the telemetry pipeline.
//!
//! A [`Reading`] is immutable once written: quality facts and alert facts
//! are computed at ingestion time and frozen into the record. Sensors are
//! owned by the registry; the core only reads their threshold profile and
//! bumps their heartbeat.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TelemetryError};

// ---

/// Parameter name for temperature (°C).
pub const TEMPERATURE: &str = "temperature";

/// Parameter name for relative humidity (%).
pub const HUMIDITY: &str = "humidity";

/// Ordered parameter → value association.
///
/// Parameters are open-ended: the well-known ones (temperature, humidity,
/// pressure, pm2.5, pm10, co2, ph, turbidity, noise) sit alongside any
/// custom parameter a sensor reports. Ordering is by parameter name, which
/// keeps alert derivation and serialization deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Measurements(BTreeMap<String, f64>);

impl Measurements {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, parameter: &str, value: f64) -> Self {
        self.0.insert(parameter.to_string(), value);
        self
    }

    pub fn insert(&mut self, parameter: impl Into<String>, value: f64) {
        self.0.insert(parameter.into(), value);
    }

    pub fn get(&self, parameter: &str) -> Option<f64> {
        self.0.get(parameter).copied()
    }

    pub fn contains(&self, parameter: &str) -> bool {
        self.0.contains_key(parameter)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Geographic position as a lng/lat pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lng: f64,
    pub lat: f64,
}

/// Device health reported alongside a measurement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    // ---
    /// Battery charge in percent.
    #[serde(default)]
    pub battery_level: Option<f64>,

    /// Radio signal strength in dBm.
    #[serde(default)]
    pub signal_strength: Option<f64>,

    #[serde(default)]
    pub firmware_version: Option<String>,
}

// ---

/// Five-tier trustworthiness classification of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityCategory {
    Excellent,
    Good,
    Fair,
    Poor,
    Invalid,
}

impl QualityCategory {
    pub const ALL: [QualityCategory; 5] = [
        Self::Excellent,
        Self::Good,
        Self::Fair,
        Self::Poor,
        Self::Invalid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Invalid => "invalid",
        }
    }

    /// Whether readings of this category feed analytics.
    ///
    /// Poor and invalid readings stay in raw storage but are excluded from
    /// time-series statistics.
    pub fn is_analytics_eligible(&self) -> bool {
        matches!(self, Self::Excellent | Self::Good | Self::Fair)
    }
}

impl fmt::Display for QualityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityCategory {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| TelemetryError::Validation(format!("unknown quality category: {s}")))
    }
}

/// Kind of data-quality problem detected during scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    MissingData,
    Outlier,
    SensorError,
    NetworkIssue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagSeverity {
    Low,
    Medium,
    High,
}

/// One data-quality finding attached to a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityFlag {
    pub kind: FlagKind,
    pub description: String,
    pub severity: FlagSeverity,
}

/// Immutable record of a single threshold breach detected at ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertFact {
    // ---
    /// `<parameter>_high` or `<parameter>_low`.
    #[serde(rename = "type")]
    pub alert_type: String,
    pub measured_value: f64,
    /// The bound that was violated, as configured at ingestion time.
    pub threshold_value: f64,
}

// ---

/// Warning/critical bounds for one parameter. Every bound is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBounds {
    #[serde(default)]
    pub warning_min: Option<f64>,
    #[serde(default)]
    pub warning_max: Option<f64>,
    #[serde(default)]
    pub critical_min: Option<f64>,
    #[serde(default)]
    pub critical_max: Option<f64>,
}

/// Per-parameter threshold configuration of a sensor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdProfile(BTreeMap<String, ThresholdBounds>);

impl ThresholdProfile {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, parameter: &str, bounds: ThresholdBounds) -> Self {
        self.0.insert(parameter.to_string(), bounds);
        self
    }

    pub fn get(&self, parameter: &str) -> Option<&ThresholdBounds> {
        self.0.get(parameter)
    }
}

/// Registry-side lifecycle state of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    Active,
    Inactive,
    Maintenance,
    Error,
}

impl SensorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Maintenance => "maintenance",
            Self::Error => "error",
        }
    }
}

impl FromStr for SensorStatus {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "maintenance" => Ok(Self::Maintenance),
            "error" => Ok(Self::Error),
            other => Err(TelemetryError::Validation(format!(
                "unknown sensor status: {other}"
            ))),
        }
    }
}

/// A parameter a sensor is equipped to measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub parameter: String,
    pub unit: String,
}

/// Default heartbeat interval for newly registered sensors (5 minutes).
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u32 = 300;

/// Largest heartbeat interval the registry accepts (PostgreSQL `INTEGER`).
pub const MAX_HEARTBEAT_INTERVAL_SECS: u32 = i32::MAX as u32;

fn default_heartbeat_interval() -> u32 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

fn default_status() -> SensorStatus {
    SensorStatus::Active
}

/// A registered sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    // ---
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Region used by regional rollups.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub thresholds: ThresholdProfile,
    #[serde(default = "default_status")]
    pub status: SensorStatus,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u32,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_maintenance_date: Option<DateTime<Utc>>,
}

impl Sensor {
    /// An active sensor with no thresholds and the default heartbeat interval.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            region: None,
            capabilities: Vec::new(),
            thresholds: ThresholdProfile::default(),
            status: SensorStatus::Active,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            last_heartbeat: None,
            next_maintenance_date: None,
        }
    }

    pub fn metadata(&self) -> SensorMetadata {
        SensorMetadata {
            status: self.status,
            heartbeat_interval_secs: self.heartbeat_interval_secs,
            last_heartbeat: self.last_heartbeat,
            next_maintenance_date: self.next_maintenance_date,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(TelemetryError::Validation("sensor id must not be empty".into()));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(TelemetryError::Validation(
                "heartbeat_interval_secs must be positive".into(),
            ));
        }
        if self.heartbeat_interval_secs > MAX_HEARTBEAT_INTERVAL_SECS {
            return Err(TelemetryError::Validation(format!(
                "heartbeat_interval_secs must be at most {MAX_HEARTBEAT_INTERVAL_SECS}"
            )));
        }
        Ok(())
    }
}

/// Liveness-related subset of a sensor, as exposed by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorMetadata {
    pub status: SensorStatus,
    pub heartbeat_interval_secs: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub next_maintenance_date: Option<DateTime<Utc>>,
}

// ---

/// Incoming measurement as submitted to `ingest`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewReading {
    // ---
    pub sensor_id: String,
    /// Defaults to the ingestion time when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub measurements: Measurements,
    #[serde(default)]
    pub device_metadata: DeviceMetadata,
}

impl NewReading {
    // ---
    pub fn new(sensor_id: &str, measurements: Measurements) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            measurements,
            ..Default::default()
        }
    }

    /// Reject malformed input before any scoring takes place.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.sensor_id.trim().is_empty() {
            return Err(TelemetryError::Validation("sensor_id must not be empty".into()));
        }

        for (parameter, value) in self.measurements.iter() {
            if parameter.is_empty() {
                return Err(TelemetryError::Validation(
                    "measurement parameter name must not be empty".into(),
                ));
            }
            if !value.is_finite() {
                return Err(TelemetryError::Validation(format!(
                    "measurement {parameter} is not a finite number"
                )));
            }
        }

        if let Some(battery) = self.device_metadata.battery_level {
            if !battery.is_finite() || !(0.0..=100.0).contains(&battery) {
                return Err(TelemetryError::Validation(format!(
                    "battery_level {battery} outside [0, 100]"
                )));
            }
        }

        if let Some(signal) = self.device_metadata.signal_strength {
            if !signal.is_finite() {
                return Err(TelemetryError::Validation(
                    "signal_strength is not a finite number".into(),
                ));
            }
        }

        if let Some(loc) = self.location {
            if !(-90.0..=90.0).contains(&loc.lat) || !(-180.0..=180.0).contains(&loc.lng) {
                return Err(TelemetryError::Validation(format!(
                    "location ({}, {}) is out of range",
                    loc.lng, loc.lat
                )));
            }
        }

        Ok(())
    }
}

/// Immutable, scored reading as written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    // ---
    pub id: Uuid,
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    /// `None` when the device did not report a position.
    pub location: Option<Location>,
    pub measurements: Measurements,
    pub quality_score: u8,
    pub quality_category: QualityCategory,
    pub quality_flags: Vec<QualityFlag>,
    pub alerts: Vec<AlertFact>,
    pub device_metadata: DeviceMetadata,
}

/// A reading together with its store insertion sequence.
///
/// `seq` is assigned by the store on append and is strictly increasing in
/// write order. It breaks ties between readings with equal timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub seq: i64,
    #[serde(flatten)]
    pub reading: Reading,
}

/// What `ingest` returns to its caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub reading_id: Uuid,
    pub quality_score: u8,
    pub quality_category: QualityCategory,
    pub alerts: Vec<AlertFact>,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_measurements_are_ordered_by_name() {
        // ---
        let m = Measurements::new()
            .with("pm2.5", 12.0)
            .with("co2", 410.0)
            .with(TEMPERATURE, 21.5);

        let names: Vec<&str> = m.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["co2", "pm2.5", "temperature"]);
        assert_eq!(m.get("co2"), Some(410.0));
        assert_eq!(m.get("noise"), None);
    }

    #[test]
    fn test_quality_category_round_trip_names() {
        // ---
        for category in QualityCategory::ALL {
            assert_eq!(category.as_str().parse::<QualityCategory>().unwrap(), category);
        }
        assert!("great".parse::<QualityCategory>().is_err());
    }

    #[test]
    fn test_analytics_allow_list() {
        // ---
        assert!(QualityCategory::Excellent.is_analytics_eligible());
        assert!(QualityCategory::Good.is_analytics_eligible());
        assert!(QualityCategory::Fair.is_analytics_eligible());
        assert!(!QualityCategory::Poor.is_analytics_eligible());
        assert!(!QualityCategory::Invalid.is_analytics_eligible());
    }

    #[test]
    fn test_alert_fact_serializes_type_field() {
        // ---
        let alert = AlertFact {
            alert_type: "temperature_high".to_string(),
            measured_value: 40.0,
            threshold_value: 35.0,
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "temperature_high");
        assert_eq!(json["measured_value"], 40.0);
    }

    #[test]
    fn test_validation_rejects_non_finite_values() {
        // ---
        let reading = NewReading::new("s-1", Measurements::new().with(TEMPERATURE, f64::NAN));
        assert!(matches!(reading.validate(), Err(TelemetryError::Validation(_))));

        let reading = NewReading::new("s-1", Measurements::new().with("co2", f64::INFINITY));
        assert!(matches!(reading.validate(), Err(TelemetryError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_out_of_domain_metadata() {
        // ---
        let mut reading = NewReading::new("s-1", Measurements::new());
        reading.device_metadata.battery_level = Some(140.0);
        assert!(reading.validate().is_err());

        let mut reading = NewReading::new("s-1", Measurements::new());
        reading.location = Some(Location { lng: 10.0, lat: 95.0 });
        assert!(reading.validate().is_err());

        let reading = NewReading::new("  ", Measurements::new());
        assert!(reading.validate().is_err());
    }

    #[test]
    fn test_new_reading_deserializes_with_defaults() {
        // ---
        let json = r#"{"sensor_id": "s-9", "measurements": {"temperature": 20.5, "ph": 7.1}}"#;
        let reading: NewReading = serde_json::from_str(json).unwrap();

        assert_eq!(reading.sensor_id, "s-9");
        assert!(reading.timestamp.is_none());
        assert_eq!(reading.measurements.get("ph"), Some(7.1));
        assert_eq!(reading.device_metadata, DeviceMetadata::default());
        assert!(reading.validate().is_ok());
    }

    #[test]
    fn test_non_numeric_measurement_fails_to_parse() {
        // ---
        let json = r#"{"sensor_id": "s-9", "measurements": {"temperature": "warm"}}"#;
        assert!(serde_json::from_str::<NewReading>(json).is_err());
    }

    #[test]
    fn test_sensor_deserializes_with_defaults() {
        // ---
        let json = r#"{"id": "s-1", "thresholds": {"temperature": {"warning_max": 35.0}}}"#;
        let sensor: Sensor = serde_json::from_str(json).unwrap();

        assert_eq!(sensor.status, SensorStatus::Active);
        assert_eq!(sensor.heartbeat_interval_secs, DEFAULT_HEARTBEAT_INTERVAL_SECS);
        assert_eq!(
            sensor.thresholds.get(TEMPERATURE).and_then(|b| b.warning_max),
            Some(35.0)
        );
    }

    #[test]
    fn test_sensor_heartbeat_interval_bounds() {
        // ---
        assert!(Sensor::new("s-1").validate().is_ok());

        let zero = Sensor {
            heartbeat_interval_secs: 0,
            ..Sensor::new("s-1")
        };
        assert!(zero.validate().is_err());

        let largest = Sensor {
            heartbeat_interval_secs: MAX_HEARTBEAT_INTERVAL_SECS,
            ..Sensor::new("s-1")
        };
        assert!(largest.validate().is_ok());

        let too_large = Sensor {
            heartbeat_interval_secs: MAX_HEARTBEAT_INTERVAL_SECS + 1,
            ..Sensor::new("s-1")
        };
        assert!(matches!(too_large.validate(), Err(TelemetryError::Validation(_))));
    }

    #[test]
    fn test_reading_without_location_serializes_null() {
        // ---
        let reading = Reading {
            id: Uuid::nil(),
            sensor_id: "s-1".into(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            location: None,
            measurements: Measurements::new(),
            quality_score: 60,
            quality_category: QualityCategory::Fair,
            quality_flags: Vec::new(),
            alerts: Vec::new(),
            device_metadata: DeviceMetadata::default(),
        };
        let json = serde_json::to_value(&reading).unwrap();
        assert!(json["location"].is_null());

        let placed = Reading {
            location: Some(Location { lng: 0.0, lat: 0.0 }),
            ..reading
        };
        let json = serde_json::to_value(&placed).unwrap();
        assert_eq!(json["location"]["lat"], 0.0);
    }
}
