//! Telemetry quality scoring, alert derivation and time-bucketed aggregation
//! for distributed environmental sensors.
//!
//! Data flow for a single measurement:
//!
//! ```text
//! NewReading
//!     │
//!     ├─► quality::assess        score and flags
//!     ├─► alerts::derive_alerts  against the sensor's threshold profile
//!     ├─► ReadingStore::append
//!     └─► EventHub               real-time push
//! ```
//!
//! Aggregation queries read the store on demand through [`Telemetry`] and
//! the pure functions in [`aggregate`].
//!
//! # Example
//!
//! ```
//! use sensorflow_telemetry::{quality, alerts, Measurements, DeviceMetadata};
//! use sensorflow_telemetry::{ThresholdBounds, ThresholdProfile, QualityCategory};
//!
//! let m = Measurements::new().with("temperature", 40.0).with("humidity", 50.0);
//! let q = quality::assess(&m, &DeviceMetadata::default());
//! assert_eq!(q.score, 100);
//! assert_eq!(q.category, QualityCategory::Excellent);
//!
//! let profile = ThresholdProfile::new().with(
//!     "temperature",
//!     ThresholdBounds { warning_max: Some(35.0), ..Default::default() },
//! );
//! let alerts = alerts::derive_alerts(&m, &profile);
//! assert_eq!(alerts[0].alert_type, "temperature_high");
//! ```

pub mod aggregate;
pub mod alerts;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod models;
pub mod quality;
pub mod routes;
pub mod schema;
pub mod severity;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{Result, TelemetryError};
pub use events::{EventHub, TelemetryEvent};
pub use health::{MaintenanceStatus, SensorHealth};
pub use models::{
    AlertFact, Capability, DeviceMetadata, FlagKind, FlagSeverity, IngestOutcome, Location,
    Measurements, NewReading, QualityCategory, QualityFlag, Reading, Sensor, SensorMetadata,
    SensorStatus, StoredReading, ThresholdBounds, ThresholdProfile,
};
pub use severity::SeverityTier;
pub use store::{MemoryStore, PgStore, ReadingFilter, ReadingStore, SensorRegistry};
pub use telemetry::{SensorView, Telemetry, DEFAULT_QUERY_TIMEOUT};
