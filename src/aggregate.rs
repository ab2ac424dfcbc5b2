//! Time-bucketed aggregation over stored readings.
//!
//! Every function here is pure and read-only: it takes a slice of stored
//! readings (whatever the store returned for the query window) and computes
//! its result from that alone. Filters are re-applied here so results do
//! not depend on how tightly a store pre-filtered its scan.
//!
//! Empty or fully-filtered inputs are not errors. List-shaped results come
//! back empty and [`Summary`] comes back zero-valued.
//!
//! Long scans poll a [`CancellationToken`]; a cancelled computation returns
//! [`TelemetryError::Cancelled`] and its partial result is dropped.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, TelemetryError};
use crate::models::{QualityCategory, Reading, StoredReading};
use crate::severity::{self, SeverityCounts, SeverityTier};

// ---

/// How many readings are processed between cancellation checks.
const CANCEL_CHECK_EVERY: usize = 1024;

/// Calendar unit used to bucket timestamps (always in UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Week,
    Month,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(TelemetryError::InvalidGranularity(other.to_string())),
        }
    }
}

/// Truncate a timestamp to the start of its calendar unit.
///
/// Weeks start on Monday (ISO 8601).
pub fn truncate(ts: DateTime<Utc>, granularity: Granularity) -> DateTime<Utc> {
    // ---
    let date = ts.date_naive();
    let midnight = |d: chrono::NaiveDate| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN));

    match granularity {
        Granularity::Hour => midnight(date) + Duration::hours(i64::from(ts.hour())),
        Granularity::Day => midnight(date),
        Granularity::Week => {
            midnight(date - Duration::days(i64::from(date.weekday().num_days_from_monday())))
        }
        Granularity::Month => midnight(date - Duration::days(i64::from(date.day0()))),
    }
}

/// Grouping dimension for rollups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Region,
    Sensor,
}

impl FromStr for Dimension {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "region" => Ok(Self::Region),
            "sensor" => Ok(Self::Sensor),
            other => Err(TelemetryError::InvalidDimension(other.to_string())),
        }
    }
}

/// Rollup key for readings from sensors with no region.
pub const UNASSIGNED_REGION: &str = "unassigned";

// ---

/// Count/avg/min/max of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterStats {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy)]
struct StatsAcc {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl StatsAcc {
    fn new(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn finish(self) -> ParameterStats {
        ParameterStats {
            count: self.count,
            avg: self.sum / self.count as f64,
            min: self.min,
            max: self.max,
        }
    }
}

#[derive(Debug, Default)]
struct ParameterAcc(BTreeMap<String, StatsAcc>);

impl ParameterAcc {
    fn add(&mut self, reading: &Reading) {
        for (parameter, value) in reading.measurements.iter() {
            match self.0.get_mut(parameter) {
                Some(acc) => acc.push(value),
                None => {
                    self.0.insert(parameter.to_string(), StatsAcc::new(value));
                }
            }
        }
    }

    fn finish(self) -> BTreeMap<String, ParameterStats> {
        self.0.into_iter().map(|(k, acc)| (k, acc.finish())).collect()
    }
}

/// Readings per quality category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QualityBreakdown {
    pub excellent: u64,
    pub good: u64,
    pub fair: u64,
    pub poor: u64,
    pub invalid: u64,
}

impl QualityBreakdown {
    pub fn record(&mut self, category: QualityCategory) {
        match category {
            QualityCategory::Excellent => self.excellent += 1,
            QualityCategory::Good => self.good += 1,
            QualityCategory::Fair => self.fair += 1,
            QualityCategory::Poor => self.poor += 1,
            QualityCategory::Invalid => self.invalid += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.excellent + self.good + self.fair + self.poor + self.invalid
    }
}

// ---

/// One bucket of a per-sensor time series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeBucket {
    pub bucket: DateTime<Utc>,
    pub count: u64,
    pub parameters: BTreeMap<String, ParameterStats>,
}

/// Alert counts for one bucket, split by severity tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertTrendBucket {
    pub bucket: DateTime<Utc>,
    #[serde(flatten)]
    pub counts: SeverityCounts,
}

/// Breakdown carried by each rollup entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RollupBreakdown {
    pub quality: QualityBreakdown,
    pub alerts: SeverityCounts,
}

/// One group of a rollup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollupEntry {
    pub key: String,
    pub count: u64,
    pub breakdown: RollupBreakdown,
}

/// Overview statistics for a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    // ---
    /// Every reading in the window, regardless of quality.
    pub total_readings: u64,
    /// Readings on the analytics allow-list.
    pub analytics_readings: u64,
    pub average_quality_score: f64,
    pub quality: QualityBreakdown,
    pub alerts: SeverityCounts,
    /// Parameter statistics over analytics-eligible readings only.
    pub parameters: BTreeMap<String, ParameterStats>,
}

/// A single alert fact viewed as a historical event.
///
/// Identified by `(reading_id, alert_index)`; it has no state of its own.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub reading_id: Uuid,
    pub alert_index: usize,
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub measured_value: f64,
    pub threshold_value: f64,
    pub severity: SeverityTier,
}

impl AlertEvent {
    /// Materialize the alert events carried by a reading.
    pub fn from_reading(reading: &Reading) -> impl Iterator<Item = AlertEvent> + '_ {
        reading
            .alerts
            .iter()
            .enumerate()
            .map(move |(alert_index, alert)| AlertEvent {
                reading_id: reading.id,
                alert_index,
                sensor_id: reading.sensor_id.clone(),
                timestamp: reading.timestamp,
                alert_type: alert.alert_type.clone(),
                measured_value: alert.measured_value,
                threshold_value: alert.threshold_value,
                severity: severity::classify(&alert.alert_type),
            })
    }
}

/// Filters for [`alert_events`].
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub sensor_id: Option<String>,
    pub severity: Option<SeverityTier>,
    pub limit: Option<usize>,
}

// ---

fn in_window(reading: &Reading, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    reading.timestamp >= start && reading.timestamp < end
}

fn checkpoint(cancel: &CancellationToken, i: usize) -> Result<()> {
    if i % CANCEL_CHECK_EVERY == 0 && cancel.is_cancelled() {
        return Err(TelemetryError::Cancelled);
    }
    Ok(())
}

/// Per-sensor time series.
///
/// Only analytics-eligible readings are counted. Buckets without readings
/// are omitted, so consecutive buckets need not be contiguous. Buckets are
/// returned in chronological order.
pub fn series(
    readings: &[StoredReading],
    sensor_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: Granularity,
    cancel: &CancellationToken,
) -> Result<Vec<TimeBucket>> {
    // ---
    let mut buckets: BTreeMap<DateTime<Utc>, (u64, ParameterAcc)> = BTreeMap::new();

    for (i, stored) in readings.iter().enumerate() {
        checkpoint(cancel, i)?;
        let r = &stored.reading;
        if r.sensor_id != sensor_id
            || !in_window(r, start, end)
            || !r.quality_category.is_analytics_eligible()
        {
            continue;
        }

        let (count, params) = buckets.entry(truncate(r.timestamp, granularity)).or_default();
        *count += 1;
        params.add(r);
    }

    Ok(buckets
        .into_iter()
        .map(|(bucket, (count, params))| TimeBucket {
            bucket,
            count,
            parameters: params.finish(),
        })
        .collect())
}

/// Most recent reading per sensor.
///
/// Ties on timestamp go to the later write (higher `seq`). Results are
/// ordered by sensor id. When `sensor_ids` is given, sensors outside it are
/// ignored and requested sensors without readings are simply absent.
pub fn latest_per_sensor(
    readings: &[StoredReading],
    sensor_ids: Option<&[String]>,
    cancel: &CancellationToken,
) -> Result<Vec<StoredReading>> {
    // ---
    let mut latest: BTreeMap<&str, &StoredReading> = BTreeMap::new();

    for (i, stored) in readings.iter().enumerate() {
        checkpoint(cancel, i)?;
        let id = stored.reading.sensor_id.as_str();
        if let Some(ids) = sensor_ids {
            if !ids.iter().any(|s| s == id) {
                continue;
            }
        }

        let newer = latest.get(id).map_or(true, |cur| {
            (stored.reading.timestamp, stored.seq) > (cur.reading.timestamp, cur.seq)
        });
        if newer {
            latest.insert(id, stored);
        }
    }

    Ok(latest.into_values().cloned().collect())
}

/// Per-bucket alert counts split by severity tier.
///
/// Every alert fact counts once toward its own tier, so a reading with two
/// alerts contributes two counts. Quality category does not matter here.
pub fn alert_trend(
    readings: &[StoredReading],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: Granularity,
    cancel: &CancellationToken,
) -> Result<Vec<AlertTrendBucket>> {
    // ---
    let mut buckets: BTreeMap<DateTime<Utc>, SeverityCounts> = BTreeMap::new();

    for (i, stored) in readings.iter().enumerate() {
        checkpoint(cancel, i)?;
        let r = &stored.reading;
        if r.alerts.is_empty() || !in_window(r, start, end) {
            continue;
        }

        let counts = buckets.entry(truncate(r.timestamp, granularity)).or_default();
        for alert in &r.alerts {
            counts.record(severity::classify(&alert.alert_type));
        }
    }

    Ok(buckets
        .into_iter()
        .map(|(bucket, counts)| AlertTrendBucket { bucket, counts })
        .collect())
}

/// Group readings in the window by an external key.
///
/// `key_of` maps a reading to its group (e.g. the sensor's region).
/// Entries are ordered by count descending, then key ascending. `limit`
/// keeps only the first N entries after ordering.
pub fn rollup<F>(
    readings: &[StoredReading],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    key_of: F,
    limit: Option<usize>,
    cancel: &CancellationToken,
) -> Result<Vec<RollupEntry>>
where
    F: Fn(&Reading) -> String,
{
    // ---
    let mut groups: HashMap<String, (u64, RollupBreakdown)> = HashMap::new();

    for (i, stored) in readings.iter().enumerate() {
        checkpoint(cancel, i)?;
        let r = &stored.reading;
        if !in_window(r, start, end) {
            continue;
        }

        let (count, breakdown) = groups.entry(key_of(r)).or_default();
        *count += 1;
        breakdown.quality.record(r.quality_category);
        for alert in &r.alerts {
            breakdown.alerts.record(severity::classify(&alert.alert_type));
        }
    }

    let mut entries: Vec<RollupEntry> = groups
        .into_iter()
        .map(|(key, (count, breakdown))| RollupEntry {
            key,
            count,
            breakdown,
        })
        .collect();

    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    if let Some(n) = limit {
        entries.truncate(n);
    }

    Ok(entries)
}

/// Overview of a window, optionally for one sensor.
pub fn summarize(
    readings: &[StoredReading],
    sensor_id: Option<&str>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<Summary> {
    // ---
    let mut summary = Summary::default();
    let mut params = ParameterAcc::default();
    let mut score_sum: u64 = 0;

    for (i, stored) in readings.iter().enumerate() {
        checkpoint(cancel, i)?;
        let r = &stored.reading;
        if sensor_id.is_some_and(|id| id != r.sensor_id) || !in_window(r, start, end) {
            continue;
        }

        summary.total_readings += 1;
        score_sum += u64::from(r.quality_score);
        summary.quality.record(r.quality_category);
        for alert in &r.alerts {
            summary.alerts.record(severity::classify(&alert.alert_type));
        }

        if r.quality_category.is_analytics_eligible() {
            summary.analytics_readings += 1;
            params.add(r);
        }
    }

    if summary.total_readings > 0 {
        summary.average_quality_score = score_sum as f64 / summary.total_readings as f64;
    }
    summary.parameters = params.finish();

    Ok(summary)
}

/// Alert events in the window, newest first.
///
/// Within a reading, events keep their alert order. Readings with equal
/// timestamps are ordered by later write first.
pub fn alert_events(
    readings: &[StoredReading],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    filter: &AlertFilter,
    cancel: &CancellationToken,
) -> Result<Vec<AlertEvent>> {
    // ---
    let mut matching: Vec<&StoredReading> = Vec::new();
    for (i, stored) in readings.iter().enumerate() {
        checkpoint(cancel, i)?;
        let r = &stored.reading;
        if r.alerts.is_empty()
            || !in_window(r, start, end)
            || filter.sensor_id.as_deref().is_some_and(|id| id != r.sensor_id)
        {
            continue;
        }
        matching.push(stored);
    }

    matching.sort_by(|a, b| {
        (b.reading.timestamp, b.seq).cmp(&(a.reading.timestamp, a.seq))
    });

    let events = matching
        .into_iter()
        .flat_map(|stored| AlertEvent::from_reading(&stored.reading))
        .filter(|e| filter.severity.map_or(true, |s| s == e.severity));

    Ok(match filter.limit {
        Some(n) => events.take(n).collect(),
        None => events.collect(),
    })
}
