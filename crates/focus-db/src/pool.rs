//! PostgreSQL pool setup.
//!
//! Every in-flight job holds its own connection for its transaction, and the
//! claim loop needs one more, so a worker pool must be sized above its
//! concurrency or claims stall behind running jobs.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use focus_core::{Error, Result};

/// Floor for `max_connections`.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Seconds to wait for a free connection before failing the query.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Connections reserved beyond job concurrency (claim loop, scheduler).
const WORKER_HEADROOM: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl PoolConfig {
    /// Read `FOCUS_DB_MAX_CONNECTIONS` and `FOCUS_DB_ACQUIRE_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_connections = std::env::var("FOCUS_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_connections);
        let acquire_timeout = std::env::var("FOCUS_DB_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.acquire_timeout);
        Self {
            max_connections,
            acquire_timeout,
            ..defaults
        }
    }

    /// Default pool grown, if needed, for `concurrency` parallel jobs.
    pub fn for_workers(concurrency: usize) -> Self {
        Self::default().with_worker_headroom(concurrency)
    }

    /// Grow `max_connections` to cover `concurrency` jobs plus headroom.
    /// Never shrinks an explicit setting.
    pub fn with_worker_headroom(mut self, concurrency: usize) -> Self {
        let needed = u32::try_from(concurrency)
            .unwrap_or(u32::MAX)
            .saturating_add(WORKER_HEADROOM);
        self.max_connections = self.max_connections.max(needed);
        self
    }

    fn options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections.min(self.max_connections))
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
            .max_lifetime(self.max_lifetime)
    }
}

pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    let pool = config
        .options()
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool ready"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_worker_keeps_floor() {
        assert_eq!(
            PoolConfig::for_workers(4).max_connections,
            DEFAULT_MAX_CONNECTIONS
        );
    }

    #[test]
    fn test_large_worker_gets_headroom() {
        assert_eq!(PoolConfig::for_workers(32).max_connections, 34);
    }

    #[test]
    fn test_headroom_never_shrinks_explicit_size() {
        let config = PoolConfig {
            max_connections: 50,
            ..PoolConfig::default()
        }
        .with_worker_headroom(8);
        assert_eq!(config.max_connections, 50);
    }

    #[test]
    fn test_min_connections_clamped_to_max() {
        let config = PoolConfig {
            max_connections: 1,
            min_connections: 5,
            ..PoolConfig::default()
        };
        // Building options must not panic on an inverted range.
        let _ = config.options();
    }
}
