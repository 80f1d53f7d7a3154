/*!
 * Orchestrator Configuration
 * Environment-driven knobs for the pool, heartbeats, and shutdown
 */

use log::info;
use std::time::Duration;

/// Idle pool sizing and staleness knobs
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Hard cap on pooled workers
    pub max_size: usize,
    /// Spares kept warm; refilled asynchronously after acquisition
    pub min_size: usize,
    /// Pooled workers older than this are recycled
    pub stale_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            min_size: 2,
            stale_timeout: Duration::from_secs(30),
        }
    }
}

/// Heartbeat probing knobs
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Time between ping ticks
    pub interval: Duration,
    /// A worker silent for longer than this counts a miss
    pub timeout: Duration,
    /// Consecutive misses before the missed-heartbeat callback fires
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            max_missed: 3,
        }
    }
}

/// Top-level configuration for the orchestration core
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub pool: PoolConfig,
    pub heartbeat: HeartbeatConfig,
    /// Grace window between SIGTERM and a forced kill
    pub shutdown_timeout: Duration,
    /// When false, workers are never registered for liveness monitoring
    pub monitoring_enabled: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            shutdown_timeout: Duration::from_secs(2),
            monitoring_enabled: true,
        }
    }
}

impl OrchestratorConfig {
    /// Build configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            pool: PoolConfig {
                max_size: read_env("LAUNCHER_POOL_MAX", defaults.pool.max_size),
                min_size: read_env("LAUNCHER_POOL_MIN", defaults.pool.min_size),
                stale_timeout: Duration::from_secs(read_env(
                    "LAUNCHER_POOL_STALE_SECS",
                    defaults.pool.stale_timeout.as_secs(),
                )),
            },
            heartbeat: HeartbeatConfig {
                interval: Duration::from_millis(read_env(
                    "LAUNCHER_HEARTBEAT_INTERVAL_MS",
                    defaults.heartbeat.interval.as_millis() as u64,
                )),
                timeout: Duration::from_millis(read_env(
                    "LAUNCHER_HEARTBEAT_TIMEOUT_MS",
                    defaults.heartbeat.timeout.as_millis() as u64,
                )),
                max_missed: read_env(
                    "LAUNCHER_HEARTBEAT_MAX_MISSED",
                    defaults.heartbeat.max_missed,
                ),
            },
            shutdown_timeout: Duration::from_millis(read_env(
                "LAUNCHER_SHUTDOWN_TIMEOUT_MS",
                defaults.shutdown_timeout.as_millis() as u64,
            )),
            monitoring_enabled: std::env::var("LAUNCHER_MONITORING_DISABLED").is_err(),
        };

        info!(
            "Orchestrator config: pool {}/{} (stale {:?}), heartbeat {:?}/{:?} x{}, shutdown {:?}, monitoring {}",
            config.pool.min_size,
            config.pool.max_size,
            config.pool.stale_timeout,
            config.heartbeat.interval,
            config.heartbeat.timeout,
            config.heartbeat.max_missed,
            config.shutdown_timeout,
            config.monitoring_enabled,
        );

        config
    }
}

fn read_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.pool.max_size, 4);
        assert_eq!(config.pool.min_size, 2);
        assert_eq!(config.heartbeat.max_missed, 3);
        assert!(config.monitoring_enabled);
    }

    #[test]
    fn test_min_never_exceeds_max_by_default() {
        let config = OrchestratorConfig::default();
        assert!(config.pool.min_size <= config.pool.max_size);
    }
}
