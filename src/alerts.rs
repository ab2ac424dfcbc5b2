//! Threshold-breach alert derivation.
//!
//! Alerts are per-reading facts, not incidents: every qualifying reading
//! gets its own alert facts even when the previous reading breached the
//! same bound. There is no de-duplication and no acknowledge/resolve state.

use crate::models::{AlertFact, Measurements, ThresholdBounds, ThresholdProfile};

// ---

const HIGH_SUFFIX: &str = "_high";
const LOW_SUFFIX: &str = "_low";

/// Derive alert facts for a measurement against a sensor's threshold profile.
///
/// Only parameters present in both the measurement and the profile are
/// checked. Each parameter contributes at most one alert. When both a
/// critical and a warning bound are breached, the critical bound is the one
/// recorded as `threshold_value`. Output order follows parameter name order.
pub fn derive_alerts(measurements: &Measurements, profile: &ThresholdProfile) -> Vec<AlertFact> {
    // ---
    let mut alerts = Vec::new();

    for (parameter, value) in measurements.iter() {
        let Some(bounds) = profile.get(parameter) else {
            continue;
        };

        if let Some(max) = breached_max(value, bounds) {
            alerts.push(AlertFact {
                alert_type: format!("{parameter}{HIGH_SUFFIX}"),
                measured_value: value,
                threshold_value: max,
            });
        } else if let Some(min) = breached_min(value, bounds) {
            alerts.push(AlertFact {
                alert_type: format!("{parameter}{LOW_SUFFIX}"),
                measured_value: value,
                threshold_value: min,
            });
        }
    }

    alerts
}

/// Whether an alert's measured value actually violates its recorded bound.
pub fn is_breach(alert: &AlertFact) -> bool {
    // ---
    if alert.alert_type.ends_with(HIGH_SUFFIX) {
        alert.measured_value > alert.threshold_value
    } else if alert.alert_type.ends_with(LOW_SUFFIX) {
        alert.measured_value < alert.threshold_value
    } else {
        false
    }
}

fn breached_max(value: f64, bounds: &ThresholdBounds) -> Option<f64> {
    [bounds.critical_max, bounds.warning_max]
        .into_iter()
        .flatten()
        .find(|max| value > *max)
}

fn breached_min(value: f64, bounds: &ThresholdBounds) -> Option<f64> {
    [bounds.critical_min, bounds.warning_min]
        .into_iter()
        .flatten()
        .find(|min| value < *min)
}
