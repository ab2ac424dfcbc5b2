//! Configuration loader for the `sensorflow-telemetry` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{anyhow, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Where readings and sensors are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// PostgreSQL at the given connection string.
    Postgres { db_url: String },
    /// In-process; data is lost on restart.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    /// Parses the backend *kind*; the Postgres URL is filled in separately.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "postgres" => Ok(Self::Postgres {
                db_url: String::new(),
            }),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!(
                "Invalid STORAGE_BACKEND: {other} (expected postgres or memory)"
            )),
        }
    }
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Storage backend selection.
    pub backend: StorageBackend,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,

    /// Deadline for a single aggregation query.
    pub query_timeout: Duration,

    /// Real-time event buffer per subscriber.
    pub broadcast_buffer: usize,
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `STORAGE_BACKEND` – `postgres` (default) or `memory`
/// - `DATABASE_URL` – PostgreSQL connection string (required for `postgres`)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `BIND_ADDR` – listen address (default: `0.0.0.0:8080`)
/// - `QUERY_TIMEOUT_SECS` – aggregation query timeout (default: 30)
/// - `BROADCAST_BUFFER` – real-time event buffer (default: 100)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let backend = match env::var("STORAGE_BACKEND").ok() {
        Some(kind) => kind.parse::<StorageBackend>()?,
        None => StorageBackend::Postgres {
            db_url: String::new(),
        },
    };
    let backend = match backend {
        StorageBackend::Postgres { .. } => StorageBackend::Postgres {
            db_url: require_env!("DATABASE_URL"),
        },
        StorageBackend::Memory => StorageBackend::Memory,
    };

    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let query_timeout_secs = parse_env_u32!("QUERY_TIMEOUT_SECS", 30);
    let broadcast_buffer = parse_env_u32!("BROADCAST_BUFFER", 100);

    let bind_addr = env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse::<SocketAddr>()
        .map_err(|e| anyhow!("Invalid BIND_ADDR: {}", e))?;

    if query_timeout_secs == 0 {
        return Err(anyhow!("QUERY_TIMEOUT_SECS must be positive"));
    }

    Ok(Config {
        backend,
        db_pool_max,
        bind_addr,
        query_timeout: Duration::from_secs(u64::from(query_timeout_secs)),
        broadcast_buffer: broadcast_buffer.max(1) as usize,
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        let backend = match &self.backend {
            StorageBackend::Postgres { db_url } => format!("postgres ({})", mask_db_url(db_url)),
            StorageBackend::Memory => "memory".to_string(),
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  STORAGE_BACKEND    : {}", backend);
        tracing::info!("  DB_POOL_MAX        : {}", self.db_pool_max);
        tracing::info!("  BIND_ADDR          : {}", self.bind_addr);
        tracing::info!("  QUERY_TIMEOUT_SECS : {}", self.query_timeout.as_secs());
        tracing::info!("  BROADCAST_BUFFER   : {}", self.broadcast_buffer);
    }
}

/// Mask the password in a database URL.
pub fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            // The only colon may be the one in "scheme://".
            if !db_url[..colon_pos].ends_with('/') && db_url[..colon_pos].contains("//") {
                return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
            }
        }
    }
    db_url.to_string()
}
