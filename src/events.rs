//! Real-time fan-out of ingestion events.
//!
//! # Delivery
//!
//! Events go out on a `tokio::sync::broadcast` channel:
//!
//! - **At most once**: only currently subscribed listeners receive an event
//! - **No replay**: a subscriber that connects later never sees earlier events
//! - **No backpressure**: a lagging subscriber loses the oldest buffered events
//!
//! Publishing never fails and never blocks ingestion.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::aggregate::AlertEvent;
use crate::models::{QualityCategory, StoredReading};

// ---

/// An event pushed to real-time subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// A reading was written.
    Reading {
        reading_id: Uuid,
        sensor_id: String,
        timestamp: DateTime<Utc>,
        quality_score: u8,
        quality_category: QualityCategory,
        alert_count: usize,
    },
    /// One alert fact carried by a written reading.
    Alert(AlertEvent),
}

/// Broadcast hub shared by ingestion and push subscribers.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<TelemetryEvent>,
}

impl EventHub {
    /// Create a hub buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish the reading event followed by one event per alert.
    pub fn publish_reading(&self, stored: &StoredReading) {
        // ---
        let r = &stored.reading;
        self.send(TelemetryEvent::Reading {
            reading_id: r.id,
            sensor_id: r.sensor_id.clone(),
            timestamp: r.timestamp,
            quality_score: r.quality_score,
            quality_category: r.quality_category,
            alert_count: r.alerts.len(),
        });

        for alert in AlertEvent::from_reading(r) {
            self.send(TelemetryEvent::Alert(alert));
        }
    }

    fn send(&self, event: TelemetryEvent) {
        // Err only means nobody is listening.
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for telemetry event");
        }
    }
}
