//! Database schema management for `sensorflow-telemetry`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use sqlx::PgPool;

use crate::error::Result;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the `sensors` registry table and the append-only `readings`
/// table, plus the indexes the aggregation scans rely on. Safe to call on
/// every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Sensor registry: identity, thresholds, heartbeat bookkeeping
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensors (
            id                      TEXT        PRIMARY KEY,
            name                    TEXT        NOT NULL DEFAULT '',
            region                  TEXT,
            capabilities            JSONB       NOT NULL DEFAULT '[]',
            thresholds              JSONB       NOT NULL DEFAULT '{}',
            status                  TEXT        NOT NULL DEFAULT 'active',
            heartbeat_interval_secs INTEGER     NOT NULL DEFAULT 300,
            last_heartbeat          TIMESTAMPTZ,
            next_maintenance_date   TIMESTAMPTZ
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Scored readings; rows are never updated or deleted by the service.
    // `seq` is the insertion order used to break timestamp ties.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            seq              BIGSERIAL   PRIMARY KEY,
            id               UUID        NOT NULL UNIQUE,
            sensor_id        TEXT        NOT NULL,
            ts               TIMESTAMPTZ NOT NULL,
            lng              DOUBLE PRECISION,
            lat              DOUBLE PRECISION,
            measurements     JSONB       NOT NULL,
            quality_score    SMALLINT    NOT NULL,
            quality_category TEXT        NOT NULL,
            quality_flags    JSONB       NOT NULL,
            alerts           JSONB       NOT NULL,
            alert_count      INTEGER     NOT NULL,
            device_metadata  JSONB       NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Per-sensor series and latest-per-sensor
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_sensor_ts
            ON readings (sensor_id, ts DESC, seq DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Window scans for rollups and summaries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_ts
            ON readings (ts);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Alert listing and alert trend
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_alerts_ts
            ON readings (ts) WHERE alert_count > 0;
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
