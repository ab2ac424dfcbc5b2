//! Quality scoring for incoming measurements.
//!
//! Scoring starts at 100 and applies additive deductions, one per rule
//! that fires. Every rule is evaluated independently, so the result does
//! not depend on rule order. The final score is clamped to `[0, 100]`.

use crate::models::{
    DeviceMetadata, FlagKind, FlagSeverity, Measurements, QualityCategory, QualityFlag,
    HUMIDITY, TEMPERATURE,
};

// ---

const MAX_SCORE: i32 = 100;

/// Parameters every reading is expected to carry.
const CRITICAL_PARAMETERS: [&str; 2] = [TEMPERATURE, HUMIDITY];

const MISSING_PARAMETER_PENALTY: i32 = 20;
const TEMPERATURE_OUTLIER_PENALTY: i32 = 15;
const HUMIDITY_OUTLIER_PENALTY: i32 = 15;
const LOW_BATTERY_PENALTY: i32 = 5;
const WEAK_SIGNAL_PENALTY: i32 = 10;

/// Physically plausible temperature range in °C.
const TEMPERATURE_RANGE: (f64, f64) = (-40.0, 60.0);

/// Relative humidity range in %.
const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);

const LOW_BATTERY_PERCENT: f64 = 20.0;
const WEAK_SIGNAL_DBM: f64 = -90.0;

/// Result of scoring one measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityAssessment {
    pub score: u8,
    pub category: QualityCategory,
    pub flags: Vec<QualityFlag>,
}

/// Score a measurement and its device metadata.
pub fn assess(measurements: &Measurements, device: &DeviceMetadata) -> QualityAssessment {
    // ---
    let mut score = MAX_SCORE;
    let mut flags = Vec::new();

    let missing: Vec<&str> = CRITICAL_PARAMETERS
        .iter()
        .copied()
        .filter(|p| !measurements.contains(p))
        .collect();

    if !missing.is_empty() {
        score -= MISSING_PARAMETER_PENALTY * missing.len() as i32;
        flags.push(QualityFlag {
            kind: FlagKind::MissingData,
            description: format!("Missing critical parameters: {}", missing.join(", ")),
            severity: FlagSeverity::High,
        });
    }

    if let Some(t) = measurements.get(TEMPERATURE) {
        if !within(t, TEMPERATURE_RANGE) {
            score -= TEMPERATURE_OUTLIER_PENALTY;
            flags.push(QualityFlag {
                kind: FlagKind::Outlier,
                description: format!("Temperature {t} outside safe range"),
                severity: FlagSeverity::Medium,
            });
        }
    }

    if let Some(h) = measurements.get(HUMIDITY) {
        if !within(h, HUMIDITY_RANGE) {
            score -= HUMIDITY_OUTLIER_PENALTY;
            flags.push(QualityFlag {
                kind: FlagKind::Outlier,
                description: format!("Humidity {h} outside valid range"),
                severity: FlagSeverity::High,
            });
        }
    }

    if let Some(battery) = device.battery_level {
        if battery < LOW_BATTERY_PERCENT {
            score -= LOW_BATTERY_PENALTY;
            flags.push(QualityFlag {
                kind: FlagKind::SensorError,
                description: format!("Low battery: {battery}%"),
                severity: FlagSeverity::Low,
            });
        }
    }

    if let Some(signal) = device.signal_strength {
        if signal < WEAK_SIGNAL_DBM {
            score -= WEAK_SIGNAL_PENALTY;
            flags.push(QualityFlag {
                kind: FlagKind::NetworkIssue,
                description: format!("Weak signal: {signal} dBm"),
                severity: FlagSeverity::Medium,
            });
        }
    }

    let score = score.clamp(0, MAX_SCORE) as u8;

    QualityAssessment {
        score,
        category: category_for(score),
        flags,
    }
}

/// Map a score to its category. First match wins, descending.
pub fn category_for(score: u8) -> QualityCategory {
    match score {
        90.. => QualityCategory::Excellent,
        75..=89 => QualityCategory::Good,
        50..=74 => QualityCategory::Fair,
        25..=49 => QualityCategory::Poor,
        _ => QualityCategory::Invalid,
    }
}

fn within(value: f64, (lo, hi): (f64, f64)) -> bool {
    value >= lo && value <= hi
}
