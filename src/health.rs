//! Sensor liveness and maintenance status.
//!
//! All functions take `now` explicitly so results are deterministic in
//! tests.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{SensorMetadata, SensorStatus};

// ---

/// A sensor is considered offline after missing this many heartbeat intervals.
pub const HEARTBEAT_GRACE_INTERVALS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceStatus {
    Unknown,
    Overdue,
    DueSoon,
    Upcoming,
    Scheduled,
}

/// Computed health view of a sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorHealth {
    pub online: bool,
    pub maintenance: MaintenanceStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Days until the next maintenance date, when one is set.
    pub days_until_maintenance: Option<i64>,
}

/// Active and heard from within `2 × heartbeat_interval`.
pub fn is_online(sensor: &SensorMetadata, now: DateTime<Utc>) -> bool {
    // ---
    if sensor.status != SensorStatus::Active {
        return false;
    }
    let Some(last) = sensor.last_heartbeat else {
        return false;
    };
    let interval = i64::from(sensor.heartbeat_interval_secs);
    let grace = Duration::seconds(interval * HEARTBEAT_GRACE_INTERVALS);
    now - last <= grace
}

/// Whole days until `next_maintenance_date`, rounded up.
pub fn days_until_maintenance(sensor: &SensorMetadata, now: DateTime<Utc>) -> Option<i64> {
    // ---
    let due = sensor.next_maintenance_date?;
    let ms = (due - now).num_milliseconds();
    Some(ms.div_euclid(DAY_MS) + i64::from(ms.rem_euclid(DAY_MS) != 0))
}

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub fn maintenance_status(sensor: &SensorMetadata, now: DateTime<Utc>) -> MaintenanceStatus {
    match days_until_maintenance(sensor, now) {
        None => MaintenanceStatus::Unknown,
        Some(d) if d < 0 => MaintenanceStatus::Overdue,
        Some(d) if d <= 7 => MaintenanceStatus::DueSoon,
        Some(d) if d <= 30 => MaintenanceStatus::Upcoming,
        Some(_) => MaintenanceStatus::Scheduled,
    }
}

pub fn assess(sensor: &SensorMetadata, now: DateTime<Utc>) -> SensorHealth {
    SensorHealth {
        online: is_online(sensor, now),
        maintenance: maintenance_status(sensor, now),
        last_heartbeat: sensor.last_heartbeat,
        days_until_maintenance: days_until_maintenance(sensor, now),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    /// 2025-06-01 12:00:00 UTC
    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn sensor(status: SensorStatus, last: Option<DateTime<Utc>>) -> SensorMetadata {
        SensorMetadata {
            status,
            heartbeat_interval_secs: 300,
            last_heartbeat: last,
            next_maintenance_date: None,
        }
    }

    fn due_in(duration: Duration) -> SensorMetadata {
        SensorMetadata {
            next_maintenance_date: Some(fixed_now() + duration),
            ..sensor(SensorStatus::Active, None)
        }
    }

    #[test]
    fn test_online_within_two_intervals() {
        // ---
        let now = fixed_now();
        assert!(is_online(&sensor(SensorStatus::Active, Some(now - Duration::seconds(60))), now));
        assert!(is_online(&sensor(SensorStatus::Active, Some(now - Duration::seconds(600))), now));
        assert!(!is_online(&sensor(SensorStatus::Active, Some(now - Duration::seconds(601))), now));
    }

    #[test]
    fn test_offline_when_not_active_or_never_seen() {
        // ---
        let now = fixed_now();
        assert!(!is_online(&sensor(SensorStatus::Maintenance, Some(now)), now));
        assert!(!is_online(&sensor(SensorStatus::Inactive, Some(now)), now));
        assert!(!is_online(&sensor(SensorStatus::Active, None), now));
    }

    #[test]
    fn test_maintenance_unknown_without_date() {
        // ---
        let s = sensor(SensorStatus::Active, None);
        assert_eq!(maintenance_status(&s, fixed_now()), MaintenanceStatus::Unknown);
        assert_eq!(days_until_maintenance(&s, fixed_now()), None);
    }

    #[test]
    fn test_maintenance_tiers() {
        // ---
        let status = |days| maintenance_status(&due_in(Duration::days(days)), fixed_now());
        assert_eq!(status(-2), MaintenanceStatus::Overdue);
        assert_eq!(status(3), MaintenanceStatus::DueSoon);
        assert_eq!(status(7), MaintenanceStatus::DueSoon);
        assert_eq!(status(20), MaintenanceStatus::Upcoming);
        assert_eq!(status(30), MaintenanceStatus::Upcoming);
        assert_eq!(status(31), MaintenanceStatus::Scheduled);
    }

    #[test]
    fn test_days_round_up() {
        // ---
        let now = fixed_now();
        let days = |offset| days_until_maintenance(&due_in(offset), now);
        // Half a day ahead rounds up to 1, half a day behind rounds up to 0.
        assert_eq!(days(Duration::hours(12)), Some(1));
        assert_eq!(days(Duration::hours(-12)), Some(0));
        assert_eq!(days(Duration::hours(-36)), Some(-1));
        assert_eq!(days(Duration::days(7) + Duration::hours(1)), Some(8));

        // Twelve hours past due is still "due soon" under ceiling semantics.
        assert_eq!(
            maintenance_status(&due_in(Duration::hours(-12)), now),
            MaintenanceStatus::DueSoon
        );
    }

    #[test]
    fn test_assess_combines_both() {
        // ---
        let now = fixed_now();
        let mut s = due_in(Duration::days(3));
        s.last_heartbeat = Some(now);
        let health = assess(&s, now);
        assert!(health.online);
        assert_eq!(health.maintenance, MaintenanceStatus::DueSoon);
        assert_eq!(health.days_until_maintenance, Some(3));
    }
}
