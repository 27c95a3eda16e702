//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use parley_core::auth::DEFAULT_TOKEN_TTL;
use parley_core::retry::{RetryPolicy, DEFAULT_RETRY_INTERVAL, DEFAULT_RETRY_TIMEOUT};
use parley_core::CachePolicy;

/// Default port to listen on.
pub const DEFAULT_PORT: u16 = 8080;

/// Default Redis port.
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Default bound on a single store or cache call, in seconds.
const DEFAULT_IO_TIMEOUT_SECS: u64 = 5;

/// Default sweep interval for the in-memory cache, in seconds.
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

/// Everything `main` needs to wire the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Directory holding the SQLite database file.
    pub data_dir: PathBuf,
    /// Database name inside `data_dir`.
    pub keyspace: String,
    /// Redis host. `None` runs with the in-memory cache.
    pub redis_host: Option<String>,
    pub redis_port: u16,
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
    pub connect_retry_secs: u64,
    pub connect_timeout_secs: u64,
    pub io_timeout_secs: u64,
    pub cache_policy: CachePolicy,
    pub cleanup_interval_secs: u64,
}

impl ServerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.connect_retry_secs),
            Duration::from_secs(self.connect_timeout_secs),
        )
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    /// The store location string handed to `MessageStore::connect`.
    pub fn store_location(&self) -> String {
        self.data_dir.to_string_lossy().into_owned()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("./data"),
            keyspace: "parley".to_string(),
            redis_host: None,
            redis_port: DEFAULT_REDIS_PORT,
            jwt_secret: String::new(),
            token_ttl_secs: DEFAULT_TOKEN_TTL.as_secs(),
            connect_retry_secs: DEFAULT_RETRY_INTERVAL.as_secs(),
            connect_timeout_secs: DEFAULT_RETRY_TIMEOUT.as_secs(),
            io_timeout_secs: DEFAULT_IO_TIMEOUT_SECS,
            cache_policy: CachePolicy::default(),
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.keyspace, "parley");
        assert_eq!(config.redis_host, None);
        assert_eq!(config.redis_port, 6379);
        assert_eq!(config.token_ttl(), Duration::from_secs(24 * 3600));
        assert_eq!(config.io_timeout(), Duration::from_secs(5));
        assert_eq!(config.cache_policy, CachePolicy::InvalidateOnSend);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = ServerConfig {
            connect_retry_secs: 2,
            connect_timeout_secs: 10,
            ..Default::default()
        };
        let retry = config.retry_policy();
        assert_eq!(retry.interval(), Duration::from_secs(2));
        assert_eq!(retry.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_cleanup_interval_is_clamped() {
        let config = ServerConfig {
            cleanup_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.cleanup_interval(), Duration::from_secs(1));
    }
}
