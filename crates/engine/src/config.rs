//! Driver configuration via `arbor.toml`
//!
//! Every field has a default, so an empty file is a valid configuration.
//! Durations are written in milliseconds.

use crate::retry::RetryConfig;
use arbor_core::{DriverError, DriverResult};
use arbor_pool::PoolConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Conventional config file name.
pub const CONFIG_FILE_NAME: &str = "arbor.toml";

/// Connection pool settings, the `[pool]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolSection {
    /// Connections per server, idle and in use combined (default: 100)
    pub max_size_per_address: usize,
    /// How long acquiring a connection may block (default: 60000)
    pub acquisition_timeout_ms: u64,
    /// Idle connections older than this are closed instead of reused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_idle_lifetime_ms: Option<u64>,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_size_per_address: 100,
            acquisition_timeout_ms: 60_000,
            max_idle_lifetime_ms: None,
        }
    }
}

/// Managed transaction retry settings, the `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySection {
    /// Total time budget for retries (default: 30000)
    pub max_retry_time_ms: u64,
    /// Delay before the first retry (default: 1000)
    pub initial_delay_ms: u64,
    /// Growth factor between consecutive delays (default: 2.0)
    pub multiplier: f64,
    /// Relative random spread applied to each delay (default: 0.2)
    pub jitter: f64,
    /// Upper bound for a single delay (default: 30000)
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retry_time_ms: 30_000,
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            jitter: 0.2,
            max_delay_ms: 30_000,
        }
    }
}

/// Driver configuration loaded from `arbor.toml`.
///
/// # Example
///
/// ```toml
/// database = "movies"
/// fetch_size = 500
///
/// [pool]
/// max_size_per_address = 50
///
/// [retry]
/// max_retry_time_ms = 10000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverConfig {
    /// Database used when a session names none; `None` is the server default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Records requested per pull (default: 1000)
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
    /// Upper bound on how long a routing table is cached (default: 300000)
    #[serde(default = "default_routing_ttl_ms")]
    pub max_routing_ttl_ms: u64,
    /// Connection pool settings
    #[serde(default)]
    pub pool: PoolSection,
    /// Retry settings
    #[serde(default)]
    pub retry: RetrySection,
}

fn default_fetch_size() -> usize {
    1000
}

fn default_routing_ttl_ms() -> u64 {
    300_000
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            database: None,
            fetch_size: default_fetch_size(),
            max_routing_ttl_ms: default_routing_ttl_ms(),
            pool: PoolSection::default(),
            retry: RetrySection::default(),
        }
    }
}

impl DriverConfig {
    /// Check values that deserialize fine but cannot work.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> DriverResult<()> {
        let invalid = |reason: &str| {
            Err(DriverError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if self.fetch_size == 0 {
            return invalid("fetch_size must be at least 1");
        }
        if self.pool.max_size_per_address == 0 {
            return invalid("pool.max_size_per_address must be at least 1");
        }
        self.retry_config().validate()
    }

    /// Pool limits described by the `[pool]` section
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_size_per_address: self.pool.max_size_per_address,
            acquisition_timeout: Duration::from_millis(self.pool.acquisition_timeout_ms),
            max_idle_lifetime: self.pool.max_idle_lifetime_ms.map(Duration::from_millis),
        }
    }

    /// Retry policy described by the `[retry]` section
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retry_time: Duration::from_millis(self.retry.max_retry_time_ms),
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            multiplier: self.retry.multiplier,
            jitter: self.retry.jitter,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    /// Cap on routing table lifetime
    pub fn max_routing_ttl(&self) -> Duration {
        Duration::from_millis(self.max_routing_ttl_ms)
    }

    /// Commented `arbor.toml` listing every setting at its default
    pub fn default_toml() -> &'static str {
        r#"# Arbor driver configuration
#
# Database used when a session does not name one.
# Leave unset for the server default.
# database = "neo4j"

# Records requested from the server per round trip.
fetch_size = 1000

# Routing tables are refreshed after the server TTL or this many
# milliseconds, whichever comes first.
max_routing_ttl_ms = 300000

[pool]
# Connections per server, idle and in use combined.
max_size_per_address = 100
# How long a session waits for a free connection before failing.
acquisition_timeout_ms = 60000
# Close idle connections older than this instead of reusing them.
# max_idle_lifetime_ms = 3600000

[retry]
# Managed transactions stop retrying once this budget is spent.
max_retry_time_ms = 30000
# Backoff: initial_delay_ms * multiplier^attempt, capped at max_delay_ms,
# randomly spread by +/- jitter.
initial_delay_ms = 1000
multiplier = 2.0
jitter = 0.2
max_delay_ms = 30000
"#
    }

    /// Load `path`, e.g. `./arbor.toml`
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the file when it is unreadable, malformed or
    /// fails [`validate`](Self::validate).
    pub fn from_file(path: &Path) -> DriverResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DriverError::InvalidConfig {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            DriverError::InvalidConfig { reason } => DriverError::InvalidConfig {
                reason: format!("{}: {}", path.display(), reason),
            },
            other => other,
        })
    }

    /// Parse and validate config from TOML text.
    pub fn from_toml(content: &str) -> DriverResult<Self> {
        let config: DriverConfig = toml::from_str(content).map_err(|e| DriverError::InvalidConfig {
            reason: format!("failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create `path` with [`default_toml`](Self::default_toml) unless a file is
    /// already there; an existing file is left untouched.
    pub fn write_default_if_missing(path: &Path) -> DriverResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| DriverError::InvalidConfig {
                reason: format!("failed to write default config file '{}': {}", path.display(), e),
            })?;
        }
        Ok(())
    }

    /// Save these settings to `path`, replacing any existing file
    pub fn write_to_file(&self, path: &Path) -> DriverResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| DriverError::InvalidConfig {
            reason: format!("failed to serialize config: {}", e),
        })?;
        std::fs::write(path, content).map_err(|e| DriverError::InvalidConfig {
            reason: format!("failed to write config file '{}': {}", path.display(), e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_config_uses_defaults() {
        let config = DriverConfig::from_toml("").unwrap();
        assert_eq!(config.fetch_size, 1000);
        assert_eq!(config.database, None);
        assert_eq!(config.pool.max_size_per_address, 100);
        assert_eq!(config.retry.max_retry_time_ms, 30_000);
        assert_eq!(config.max_routing_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn default_toml_matches_defaults() {
        let parsed = DriverConfig::from_toml(DriverConfig::default_toml()).unwrap();
        assert_eq!(parsed, DriverConfig::default());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = DriverConfig::from_toml("[retry]\ninitial_delay_ms = 50\n").unwrap();
        assert_eq!(config.retry.initial_delay_ms, 50);
        assert_eq!(config.retry.multiplier, 2.0);
        assert_eq!(config.pool, PoolSection::default());
    }

    #[test]
    fn derived_configs() {
        let config = DriverConfig::from_toml(
            "[pool]\nmax_size_per_address = 7\nmax_idle_lifetime_ms = 500\n[retry]\njitter = 0.0\n",
        )
        .unwrap();
        let pool = config.pool_config();
        assert_eq!(pool.max_size_per_address, 7);
        assert_eq!(pool.acquisition_timeout, Duration::from_secs(60));
        assert_eq!(pool.max_idle_lifetime, Some(Duration::from_millis(500)));

        let retry = config.retry_config();
        assert_eq!(retry.initial_delay, Duration::from_secs(1));
        assert_eq!(retry.jitter, 0.0);
    }

    #[test]
    fn invalid_values_rejected() {
        for bad in [
            "fetch_size = 0",
            "[pool]\nmax_size_per_address = 0",
            "[retry]\nmultiplier = 0.5",
            "[retry]\njitter = 1.5",
        ] {
            let err = DriverConfig::from_toml(bad).unwrap_err();
            assert!(matches!(err, DriverError::InvalidConfig { .. }), "{}", bad);
        }
    }

    #[test]
    fn unparsable_file_names_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "fetch_size = \"lots\"").unwrap();
        match DriverConfig::from_file(&path).unwrap_err() {
            DriverError::InvalidConfig { reason } => assert!(reason.contains(CONFIG_FILE_NAME)),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn missing_file_gets_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        DriverConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());
        assert_eq!(DriverConfig::from_file(&path).unwrap().fetch_size, 1000);
    }

    #[test]
    fn existing_file_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "fetch_size = 10\n").unwrap();

        DriverConfig::write_default_if_missing(&path).unwrap();
        assert_eq!(DriverConfig::from_file(&path).unwrap().fetch_size, 10);
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = DriverConfig {
            database: Some("movies".to_string()),
            fetch_size: 25,
            max_routing_ttl_ms: 1_000,
            pool: PoolSection {
                max_size_per_address: 4,
                acquisition_timeout_ms: 250,
                max_idle_lifetime_ms: Some(10_000),
            },
            retry: RetrySection::default(),
        };

        config.write_to_file(&path).unwrap();
        assert_eq!(DriverConfig::from_file(&path).unwrap(), config);
    }
}
