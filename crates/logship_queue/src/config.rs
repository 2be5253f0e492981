//! Queue configuration.

use std::time::Duration;

/// Configuration for opening a durable queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Soft cap on segment file size; crossing it triggers rotation.
    pub max_bytes_per_file: u64,

    /// Minimum accepted payload size in bytes.
    pub min_msg_size: u64,

    /// Maximum accepted payload size in bytes.
    pub max_msg_size: u64,

    /// Number of writes between forced metadata syncs.
    pub sync_every: u64,

    /// Interval of the periodic sync tick.
    pub sync_interval: Duration,

    /// Capacity of the actor's request inbox (backpressure bound).
    pub inbox_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_bytes_per_file: 1024 * 1024 * 1024, // 1 GiB
            min_msg_size: 0,
            max_msg_size: 10 * 1024 * 1024, // 10 MiB
            sync_every: 1024,
            sync_interval: Duration::from_secs(1),
            inbox_capacity: 64,
        }
    }
}

impl QueueConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the soft cap on segment file size.
    #[must_use]
    pub const fn max_bytes_per_file(mut self, size: u64) -> Self {
        self.max_bytes_per_file = size;
        self
    }

    /// Sets the accepted payload size bounds.
    #[must_use]
    pub const fn msg_size_bounds(mut self, min: u64, max: u64) -> Self {
        self.min_msg_size = min;
        self.max_msg_size = max;
        self
    }

    /// Sets the number of writes between forced syncs.
    #[must_use]
    pub const fn sync_every(mut self, count: u64) -> Self {
        self.sync_every = count;
        self
    }

    /// Sets the periodic sync tick interval.
    #[must_use]
    pub const fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.max_bytes_per_file, 1024 * 1024 * 1024);
        assert_eq!(config.min_msg_size, 0);
        assert_eq!(config.sync_every, 1024);
    }

    #[test]
    fn builder_pattern() {
        let config = QueueConfig::new()
            .max_bytes_per_file(1024)
            .msg_size_bounds(4, 1 << 10)
            .sync_every(8);

        assert_eq!(config.max_bytes_per_file, 1024);
        assert_eq!(config.min_msg_size, 4);
        assert_eq!(config.max_msg_size, 1 << 10);
        assert_eq!(config.sync_every, 8);
    }
}
