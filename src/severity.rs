//! Alert severity tiers.
//!
//! One table, consulted by alert listing, trend aggregation and real-time
//! push alike.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityTier {
    Low,
    Medium,
    High,
}

impl SeverityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for SeverityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeverityTier {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(TelemetryError::Validation(format!("unknown severity: {other}"))),
        }
    }
}

/// Ordered alert-type → tier table. First match wins.
pub const SEVERITY_TABLE: &[(&[&str], SeverityTier)] = &[
    (
        &["temperature_critical", "air_quality_hazardous"],
        SeverityTier::High,
    ),
    (
        &["temperature_high", "air_quality_poor", "sensor_offline"],
        SeverityTier::Medium,
    ),
    (&["humidity_high", "battery_low"], SeverityTier::Low),
];

/// Tier for types not listed in the table.
pub const DEFAULT_SEVERITY: SeverityTier = SeverityTier::Medium;

/// Classify an alert type.
pub fn classify(alert_type: &str) -> SeverityTier {
    SEVERITY_TABLE
        .iter()
        .find(|(types, _)| types.contains(&alert_type))
        .map(|(_, tier)| *tier)
        .unwrap_or(DEFAULT_SEVERITY)
}

/// Per-tier alert counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

impl SeverityCounts {
    pub fn record(&mut self, tier: SeverityTier) {
        match tier {
            SeverityTier::High => self.high += 1,
            SeverityTier::Medium => self.medium += 1,
            SeverityTier::Low => self.low += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.high + self.medium + self.low
    }
}
