use std::net::SocketAddr;
use std::time::Duration;

use crate::shared::domain::errors::AppError;

/// Runtime configuration, collected once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub db_max_connections: u32,
    pub command_timeout: Duration,
    pub max_command_retries: u32,
    pub aggregate_idle_ttl: Duration,
    pub eviction_interval: Duration,
    pub projection_poll_interval: Duration,
    pub projection_batch_size: usize,
    pub checkpoint_age_days: i64,
    pub snapshot_interval: Duration,
    pub rate_limit_capacity: f64,
    pub rate_limit_refill_per_sec: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| AppError::configuration("DATABASE_URL is required"))?;
        let bind_addr = env_or("BIND_ADDR", "127.0.0.1:3100")
            .parse()
            .map_err(|e| AppError::configuration(format!("invalid BIND_ADDR: {}", e)))?;

        Ok(Self {
            bind_addr,
            database_url,
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", 10)?,
            command_timeout: Duration::from_millis(parse_env("COMMAND_TIMEOUT_MS", 5_000)?),
            max_command_retries: parse_env("COMMAND_MAX_RETRIES", 5)?,
            aggregate_idle_ttl: Duration::from_secs(parse_env("AGGREGATE_IDLE_TTL_SECS", 300)?),
            eviction_interval: Duration::from_secs(parse_env("EVICTION_INTERVAL_SECS", 60)?),
            projection_poll_interval: Duration::from_millis(parse_env(
                "PROJECTION_POLL_MS",
                500,
            )?),
            projection_batch_size: parse_env("PROJECTION_BATCH_SIZE", 256)?,
            checkpoint_age_days: parse_env("CHECKPOINT_AGE_DAYS", 45)?,
            snapshot_interval: Duration::from_secs(parse_env("SNAPSHOT_INTERVAL_SECS", 3600)?),
            rate_limit_capacity: parse_env("RATE_LIMIT_CAPACITY", 20.0)?,
            rate_limit_refill_per_sec: parse_env("RATE_LIMIT_REFILL_PER_SEC", 10.0)?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| AppError::configuration(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}
