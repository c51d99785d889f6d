//! Configuration Module
//!
//! Loads process configuration from environment variables, once, at bootstrap.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::resilience::CircuitBreakerConfig;
use crate::store::ReconnectPolicy;

/// Process configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Connection string of the remote store; `None` selects the in-process store
    pub redis_url: Option<String>,
    /// HTTP server port
    pub server_port: u16,
    /// Capacity of the in-process store
    pub memory_max_entries: usize,
    /// Seconds between expired-entry sweeps of the in-process store
    pub cleanup_interval: u64,
    /// Store connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// First reconnect backoff in milliseconds
    pub reconnect_base_ms: u64,
    /// Reconnect backoff cap in milliseconds
    pub reconnect_max_ms: u64,
    /// Default consecutive failures before a breaker opens
    pub breaker_failure_threshold: u32,
    /// Default breaker cool-down in milliseconds
    pub breaker_reset_timeout_ms: u64,
    /// Default trial successes needed to close a breaker
    pub breaker_half_open_successes: u32,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `REDIS_URL` - Remote store connection string (default: unset, in-process store)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `MEMORY_MAX_ENTRIES` - In-process store capacity (default: 10000)
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 1)
    /// - `CACHE_CONNECT_TIMEOUT_MS` - Connect timeout (default: 2000)
    /// - `CACHE_RECONNECT_BASE_MS` - First reconnect backoff (default: 50)
    /// - `CACHE_RECONNECT_MAX_MS` - Reconnect backoff cap (default: 5000)
    /// - `BREAKER_FAILURE_THRESHOLD` - Failures before opening (default: 5)
    /// - `BREAKER_RESET_TIMEOUT_MS` - Breaker cool-down (default: 30000)
    /// - `BREAKER_HALF_OPEN_SUCCESSES` - Trial successes to close (default: 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: env::var("REDIS_URL")
                .ok()
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty()),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            memory_max_entries: env_or("MEMORY_MAX_ENTRIES", defaults.memory_max_entries),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            connect_timeout_ms: env_or("CACHE_CONNECT_TIMEOUT_MS", defaults.connect_timeout_ms),
            reconnect_base_ms: env_or("CACHE_RECONNECT_BASE_MS", defaults.reconnect_base_ms),
            reconnect_max_ms: env_or("CACHE_RECONNECT_MAX_MS", defaults.reconnect_max_ms),
            breaker_failure_threshold: env_or(
                "BREAKER_FAILURE_THRESHOLD",
                defaults.breaker_failure_threshold,
            ),
            breaker_reset_timeout_ms: env_or(
                "BREAKER_RESET_TIMEOUT_MS",
                defaults.breaker_reset_timeout_ms,
            ),
            breaker_half_open_successes: env_or(
                "BREAKER_HALF_OPEN_SUCCESSES",
                defaults.breaker_half_open_successes,
            ),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            base_delay: Duration::from_millis(self.reconnect_base_ms),
            max_delay: Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_base_ms)),
        }
    }

    pub fn breaker_defaults(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(
            self.breaker_failure_threshold.max(1),
            Duration::from_millis(self.breaker_reset_timeout_ms),
        )
        .with_half_open_success_threshold(self.breaker_half_open_successes.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: None,
            server_port: 3000,
            memory_max_entries: 10_000,
            cleanup_interval: 1,
            connect_timeout_ms: 2_000,
            reconnect_base_ms: 50,
            reconnect_max_ms: 5_000,
            breaker_failure_threshold: 5,
            breaker_reset_timeout_ms: 30_000,
            breaker_half_open_successes: 1,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.redis_url.is_none());
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.memory_max_entries, 10_000);
        assert_eq!(config.breaker_failure_threshold, 5);
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        env::set_var("RESILIENT_CACHE_TEST_PORT", "not-a-number");
        assert_eq!(env_or("RESILIENT_CACHE_TEST_PORT", 8080u16), 8080);

        env::set_var("RESILIENT_CACHE_TEST_PORT", " 9090 ");
        assert_eq!(env_or("RESILIENT_CACHE_TEST_PORT", 8080u16), 9090);
        env::remove_var("RESILIENT_CACHE_TEST_PORT");
    }

    #[test]
    fn test_reconnect_policy_cap_never_below_base() {
        let config = Config {
            reconnect_base_ms: 500,
            reconnect_max_ms: 100,
            ..Config::default()
        };
        let policy = config.reconnect_policy();
        assert_eq!(policy.max_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_breaker_defaults() {
        let config = Config {
            breaker_failure_threshold: 0,
            breaker_reset_timeout_ms: 1_500,
            ..Config::default()
        };
        let breaker = config.breaker_defaults();
        assert_eq!(breaker.failure_threshold, 1);
        assert_eq!(breaker.reset_timeout, Duration::from_millis(1_500));
        assert_eq!(breaker.half_open_success_threshold, 1);
    }
}
