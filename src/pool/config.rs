//! Pool sizing and wait-queue configuration.

use std::time::Duration;

use super::PoolError;

/// Slots created when nothing else is configured.
pub const DEFAULT_MAX_SIZE: usize = 10;

/// Highest slot count the database tier is provisioned for in production.
pub const MAX_SIZE_CEILING: usize = 115;

const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct PoolConfig {
    max_size: usize,
    queue_limit: Option<usize>,
    wait_for_connections: bool,
    acquire_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    reap_interval: Duration,
}

impl PoolConfig {
    /// Defaults: 10 slots, unbounded queue, callers wait without a deadline,
    /// idle slots are never evicted.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            queue_limit: None,
            wait_for_connections: true,
            acquire_timeout: None,
            idle_timeout: None,
            reap_interval: DEFAULT_REAP_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// `None` (or `Some(0)`, mirroring the usual driver convention) means unbounded.
    #[must_use]
    pub fn with_queue_limit(mut self, limit: Option<usize>) -> Self {
        self.queue_limit = limit.filter(|limit| *limit > 0);
        self
    }

    #[must_use]
    pub fn with_wait_for_connections(mut self, wait: bool) -> Self {
        self.wait_for_connections = wait;
        self
    }

    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[must_use]
    pub fn queue_limit(&self) -> Option<usize> {
        self.queue_limit
    }

    #[must_use]
    pub fn wait_for_connections(&self) -> bool {
        self.wait_for_connections
    }

    #[must_use]
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    #[must_use]
    pub fn reap_interval(&self) -> Duration {
        self.reap_interval
    }

    /// # Errors
    /// Returns `PoolError::Config` when the slot count is zero or above the ceiling.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::Config(
                "max_size must be at least 1".to_string(),
            ));
        }
        if self.max_size > MAX_SIZE_CEILING {
            return Err(PoolError::Config(format!(
                "max_size {} exceeds the ceiling of {MAX_SIZE_CEILING}",
                self.max_size
            )));
        }
        if self.reap_interval.is_zero() {
            return Err(PoolError::Config(
                "reap_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}
