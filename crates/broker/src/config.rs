use std::time::Duration;

/// Configuration for the Redis broker backend.
#[derive(Debug, Clone)]
pub struct RedisBrokerConfig {
    /// Redis connection URL, e.g. `redis://localhost:6379/0`.
    pub url: String,
    /// Maximum number of pooled connections.
    pub pool_size: usize,
    /// How long to wait for a pooled connection before failing.
    pub connection_timeout: Duration,
}

impl RedisBrokerConfig {
    /// Create a config for the given URL with default pool settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: 16,
            connection_timeout: Duration::from_secs(5),
        }
    }

    /// Set the maximum pool size.
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = RedisBrokerConfig::new("redis://localhost:6379/0");
        assert_eq!(cfg.pool_size, 16);
        assert_eq!(cfg.connection_timeout, Duration::from_secs(5));
    }
}
