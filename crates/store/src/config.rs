/// Configuration for the PostgreSQL event store.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of pooled connections.
    pub pool_size: u32,
}

impl PostgresConfig {
    /// Create a config for the given URL with default pool settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: 10,
        }
    }

    /// Set the maximum pool size.
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = PostgresConfig::new("postgres://localhost/mailward");
        assert_eq!(cfg.pool_size, 10);
    }
}
