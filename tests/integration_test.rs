use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use sensorflow_telemetry::{
    routes, EventHub, MemoryStore, Reading, ReadingFilter, ReadingStore, StoredReading, Telemetry,
    TelemetryError, DEFAULT_QUERY_TIMEOUT,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---

/// Boot the full router on an ephemeral port with in-memory storage.
async fn spawn_app() -> Result<String> {
    serve(Telemetry::in_memory(EventHub::new(64), DEFAULT_QUERY_TIMEOUT)).await
}

async fn serve(telemetry: Telemetry) -> Result<String> {
    // ---
    let app = routes::router(telemetry);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr: SocketAddr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(format!("http://{}", addr))
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

async fn register_sensors(client: &Client, base: &str) -> Result<()> {
    // ---
    let s1 = json!({
        "id": "s1",
        "name": "Roof north",
        "region": "north",
        "thresholds": { "temperature": { "warning_max": 35.0, "critical_max": 50.0 } }
    });
    let s2 = json!({ "id": "s2", "region": "south" });

    for body in [s1, s2] {
        let res = client.post(format!("{base}/sensors")).json(&body).send().await?;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }
    Ok(())
}

async fn post_reading(client: &Client, base: &str, body: Value) -> Result<(StatusCode, Value)> {
    let res = client.post(format!("{base}/readings")).json(&body).send().await?;
    let status = res.status();
    Ok((status, res.json().await?))
}

#[tokio::test]
async fn test_health_endpoint() -> Result<()> {
    // ---
    let base = spawn_app().await?;
    let body: Value = Client::new()
        .get(format!("{base}/health"))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn test_ingest_scores_and_raises_alert() -> Result<()> {
    // ---
    let base = spawn_app().await?;
    let client = Client::new();
    register_sensors(&client, &base).await?;

    let (status, outcome) = post_reading(
        &client,
        &base,
        json!({
            "sensor_id": "s1",
            "measurements": { "temperature": 40.0, "humidity": 50.0 }
        }),
    )
    .await?;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(outcome["quality_score"], 100);
    assert_eq!(outcome["quality_category"], "excellent");
    assert_eq!(outcome["alerts"][0]["type"], "temperature_high");
    assert_eq!(outcome["alerts"][0]["measured_value"], 40.0);
    assert_eq!(outcome["alerts"][0]["threshold_value"], 35.0);

    // Ingestion doubles as a heartbeat.
    let health: Value = client
        .get(format!("{base}/sensors/s1/health"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(health["online"], true);

    Ok(())
}

#[tokio::test]
async fn test_ingest_rejections() -> Result<()> {
    // ---
    let base = spawn_app().await?;
    let client = Client::new();
    register_sensors(&client, &base).await?;

    let (status, body) = post_reading(
        &client,
        &base,
        json!({ "sensor_id": "ghost", "measurements": { "temperature": 20.0 } }),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "sensor_not_found");

    let future = ts(Utc::now() + Duration::hours(1));
    let (status, body) = post_reading(
        &client,
        &base,
        json!({ "sensor_id": "s1", "timestamp": future, "measurements": {} }),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "future_timestamp");

    let (status, body) = post_reading(
        &client,
        &base,
        json!({ "sensor_id": "s1", "measurements": { "temperature": "hot" } }),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    // Nothing above was stored.
    let latest: Vec<Value> = client
        .get(format!("{base}/readings/latest"))
        .send()
        .await?
        .json()
        .await?;
    assert!(latest.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_dashboard_queries() -> Result<()> {
    // ---
    let base = spawn_app().await?;
    let client = Client::new();
    register_sensors(&client, &base).await?;

    let now = Utc::now();
    let samples = [
        ("s1", 90, 20.0, 50.0),
        ("s1", 60, 40.0, 55.0),
        ("s1", 30, 22.0, 60.0),
        ("s2", 45, 18.0, 40.0),
    ];
    for (sensor, minutes_ago, temp, hum) in samples {
        let (status, _) = post_reading(
            &client,
            &base,
            json!({
                "sensor_id": sensor,
                "timestamp": ts(now - Duration::minutes(minutes_ago)),
                "measurements": { "temperature": temp, "humidity": hum }
            }),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED);
    }

    let start = ts(now - Duration::days(1));
    let end = ts(now + Duration::minutes(1));

    // Latest per sensor, ordered by sensor id.
    let latest: Vec<Value> = client
        .get(format!("{base}/readings/latest"))
        .query(&[("sensor_ids", "s1,s2")])
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0]["sensor_id"], "s1");
    assert_eq!(latest[0]["measurements"]["temperature"], 22.0);

    // Hourly series covers all three s1 readings.
    let series: Vec<Value> = client
        .get(format!("{base}/sensors/s1/series"))
        .query(&[("start", &start), ("end", &end), ("granularity", &"hour".to_string())])
        .send()
        .await?
        .json()
        .await?;
    let total: u64 = series.iter().filter_map(|b| b["count"].as_u64()).sum();
    assert_eq!(total, 3);

    // One temperature_high alert, classified medium.
    let trend: Vec<Value> = client
        .get(format!("{base}/alerts/trend"))
        .query(&[("start", &start), ("end", &end), ("granularity", &"day".to_string())])
        .send()
        .await?
        .json()
        .await?;
    let medium: u64 = trend.iter().filter_map(|b| b["medium"].as_u64()).sum();
    assert_eq!(medium, 1);

    let alerts: Vec<Value> = client
        .get(format!("{base}/alerts"))
        .query(&[("start", &start), ("end", &end), ("severity", &"medium".to_string())])
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["sensor_id"], "s1");

    let rollup: Vec<Value> = client
        .get(format!("{base}/rollups/region"))
        .query(&[("start", &start), ("end", &end)])
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(rollup[0]["key"], "north");
    assert_eq!(rollup[0]["count"], 3);
    assert_eq!(rollup[1]["key"], "south");

    let summary: Value = client
        .get(format!("{base}/summary"))
        .query(&[("start", &start), ("end", &end)])
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(summary["total_readings"], 4);
    assert_eq!(summary["parameters"]["temperature"]["max"], 40.0);

    Ok(())
}

#[tokio::test]
async fn test_invalid_query_parameters() -> Result<()> {
    // ---
    let base = spawn_app().await?;
    let client = Client::new();
    let start = ts(Utc::now() - Duration::days(1));
    let end = ts(Utc::now());

    let res = client
        .get(format!("{base}/sensors/s1/series"))
        .query(&[("start", &start), ("end", &end), ("granularity", &"fortnight".to_string())])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert_eq!(body["error"], "invalid_granularity");

    let res = client
        .get(format!("{base}/rollups/planet"))
        .query(&[("start", &start), ("end", &end)])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client.get(format!("{base}/sensors/ghost/health")).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    Ok(())
}

#[test]
fn test_sensor_listing_is_empty_on_fresh_service() {
    // ---
    let telemetry = Telemetry::in_memory(EventHub::new(4), DEFAULT_QUERY_TIMEOUT);
    let sensors = tokio_test::block_on(telemetry.list_sensors(Utc::now()));
    let sensors = tokio_test::assert_ok!(sensors);
    assert!(sensors.is_empty());
}

/// Wait until the server has registered `n` real-time subscribers.
async fn wait_for_subscribers(client: &Client, base: &str, n: u64) -> Result<()> {
    // ---
    for _ in 0..100 {
        let body: Value = client.get(format!("{base}/health")).send().await?.json().await?;
        if body["subscribers"].as_u64() == Some(n) {
            return Ok(());
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    Err(anyhow!("subscriber never registered"))
}

async fn next_event(ws: &mut WsStream) -> Result<Value> {
    // ---
    loop {
        let frame = tokio::time::timeout(StdDuration::from_secs(5), ws.next())
            .await?
            .ok_or_else(|| anyhow!("socket closed"))??;
        if let Message::Text(text) = frame {
            return Ok(serde_json::from_str(&text)?);
        }
    }
}

#[tokio::test]
async fn test_ws_pushes_reading_then_alert() -> Result<()> {
    // ---
    let base = spawn_app().await?;
    let client = Client::new();
    register_sensors(&client, &base).await?;

    let ws_url = format!("{}/ws", base.replacen("http://", "ws://", 1));
    let (mut ws, _response) = connect_async(ws_url.as_str()).await?;
    wait_for_subscribers(&client, &base, 1).await?;

    let (status, outcome) = post_reading(
        &client,
        &base,
        json!({
            "sensor_id": "s1",
            "measurements": { "temperature": 40.0, "humidity": 50.0 }
        }),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let reading = next_event(&mut ws).await?;
    assert_eq!(reading["event"], "reading");
    assert_eq!(reading["sensor_id"], "s1");
    assert_eq!(reading["reading_id"], outcome["reading_id"]);
    assert_eq!(reading["alert_count"], 1);

    let alert = next_event(&mut ws).await?;
    assert_eq!(alert["event"], "alert");
    assert_eq!(alert["type"], "temperature_high");
    assert_eq!(alert["severity"], "medium");
    assert_eq!(alert["alert_index"], 0);

    Ok(())
}

/// Reading store that never answers within the query deadline.
struct StalledStore;

#[async_trait]
impl ReadingStore for StalledStore {
    // ---
    async fn append(&self, _reading: Reading) -> sensorflow_telemetry::Result<StoredReading> {
        Err(TelemetryError::Store("read-only store".into()))
    }

    async fn scan(
        &self,
        _filter: &ReadingFilter,
    ) -> sensorflow_telemetry::Result<Vec<StoredReading>> {
        tokio::time::sleep(StdDuration::from_secs(10)).await;
        Ok(Vec::new())
    }

    async fn latest(
        &self,
        _sensor_ids: Option<&[String]>,
        _cancel: &CancellationToken,
    ) -> sensorflow_telemetry::Result<Vec<StoredReading>> {
        tokio::time::sleep(StdDuration::from_secs(10)).await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_slow_query_returns_gateway_timeout() -> Result<()> {
    // ---
    let telemetry = Telemetry::new(
        Arc::new(StalledStore),
        Arc::new(MemoryStore::new()),
        EventHub::new(4),
        StdDuration::from_millis(50),
    );
    let base = serve(telemetry).await?;
    let client = Client::new();

    let res = client
        .get(format!("{base}/summary"))
        .query(&[("start", ts(Utc::now() - Duration::days(1))), ("end", ts(Utc::now()))])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    let body: Value = res.json().await?;
    assert_eq!(body["error"], "query_timeout");

    let res = client.get(format!("{base}/readings/latest")).send().await?;
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);

    Ok(())
}
