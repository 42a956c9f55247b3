//! Gateway configuration.

use std::time::Duration;

use crate::batch::BatchConfig;

/// Default time `SQLite` waits on a locked database before failing.
const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;

/// Default sleep between pending-operation checks during shutdown.
const DEFAULT_SHUTDOWN_POLL_MS: u64 = 100;

/// Default number of pending-operation checks during shutdown.
const DEFAULT_SHUTDOWN_MAX_POLLS: u32 = 50;

/// Configuration for the [`Gateway`](crate::Gateway).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL.
    ///
    /// Format: `sqlite://path/to/genforge.db` or `sqlite::memory:`.
    pub url: String,
    /// How long a statement waits on a locked database.
    pub busy_timeout: Duration,
    /// Sleep between pending-operation checks while shutting down.
    pub shutdown_poll_interval: Duration,
    /// Maximum pending-operation checks while shutting down.
    pub shutdown_max_polls: u32,
    /// Write batching thresholds.
    pub batch: BatchConfig,
}

impl DatabaseConfig {
    /// Create a configuration from a database URL with default settings.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            busy_timeout: Duration::from_secs(DEFAULT_BUSY_TIMEOUT_SECS),
            shutdown_poll_interval: Duration::from_millis(DEFAULT_SHUTDOWN_POLL_MS),
            shutdown_max_polls: DEFAULT_SHUTDOWN_MAX_POLLS,
            batch: BatchConfig::default(),
        }
    }

    /// An in-memory database.
    pub fn in_memory() -> Self {
        Self::new("sqlite::memory:")
    }

    /// Set the busy timeout.
    #[must_use]
    pub const fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Set the shutdown poll interval and count.
    #[must_use]
    pub const fn with_shutdown_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.shutdown_poll_interval = interval;
        self.shutdown_max_polls = max_polls;
        self
    }

    /// Set the batching thresholds.
    #[must_use]
    pub const fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new("sqlite://genforge.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = DatabaseConfig::in_memory();
        assert_eq!(config.shutdown_poll_interval, Duration::from_millis(100));
        assert_eq!(config.shutdown_max_polls, 50);
        assert_eq!(config.batch.max_size, 20);
        assert_eq!(config.batch.max_age, Duration::from_secs(2));
    }

    #[test]
    fn builder_overrides() {
        let batch = BatchConfig {
            max_size: 3,
            ..BatchConfig::default()
        };
        let config = DatabaseConfig::in_memory()
            .with_batch(batch)
            .with_shutdown_polling(Duration::from_millis(5), 2);
        assert_eq!(config.batch.max_size, 3);
        assert_eq!(config.shutdown_max_polls, 2);
    }
}
