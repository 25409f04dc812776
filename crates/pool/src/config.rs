//! Pool sizing and timeouts

use std::time::Duration;

/// Default maximum connections per address
pub const DEFAULT_MAX_SIZE_PER_ADDRESS: usize = 100;

/// Default time `acquire` may block
pub const DEFAULT_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(60);

/// Limits applied by a [`ConnectionPool`](crate::ConnectionPool)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections per address, idle and in use combined
    pub max_size_per_address: usize,
    /// Default wait when every slot is taken
    pub acquisition_timeout: Duration,
    /// Idle connections older than this are closed instead of lent
    pub max_idle_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size_per_address: DEFAULT_MAX_SIZE_PER_ADDRESS,
            acquisition_timeout: DEFAULT_ACQUISITION_TIMEOUT,
            max_idle_lifetime: None,
        }
    }
}

impl PoolConfig {
    /// Create with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: maximum connections per address (at least 1)
    pub fn with_max_size(mut self, max: usize) -> Self {
        self.max_size_per_address = max.max(1);
        self
    }

    /// Builder: default acquisition timeout
    pub fn with_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.acquisition_timeout = timeout;
        self
    }

    /// Builder: idle lifetime
    pub fn with_max_idle_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_idle_lifetime = Some(lifetime);
        self
    }
}
