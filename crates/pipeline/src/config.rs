use std::time::Duration;

/// Tunables shared by the pipeline workers, loaded from the environment.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How long per-job aggregation state may live (`STATE_TTL_SECONDS`).
    /// Must exceed the slowest analyzer's end-to-end deadline.
    pub state_ttl: Duration,
    /// How often the reaper scans for expired state
    /// (`REAPER_INTERVAL_SECONDS`).
    pub reaper_interval: Duration,
    /// Concurrent in-flight dynamic analyses (`ANALYZER_SEMAPHORE`).
    pub analyzer_semaphore: usize,
    /// Concurrent provider label calls (`LABEL_SEMAPHORE`).
    pub label_semaphore: usize,
    /// Whether malicious mail is also moved to the spam folder
    /// (`MOVE_MALICIOUS_TO_QUARANTINE`).
    pub move_malicious_to_quarantine: bool,
    /// Entries requested per broker read.
    pub read_count: usize,
    /// Blocking-read bound.
    pub read_block: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            state_ttl: Duration::from_secs(600),
            reaper_interval: Duration::from_secs(60),
            analyzer_semaphore: 2,
            label_semaphore: 5,
            move_malicious_to_quarantine: true,
            read_count: 10,
            read_block: Duration::from_secs(5),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Load the config from environment variables, falling back to defaults
    /// for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            state_ttl: Duration::from_secs(env_u64(
                "STATE_TTL_SECONDS",
                defaults.state_ttl.as_secs(),
            )),
            reaper_interval: Duration::from_secs(env_u64(
                "REAPER_INTERVAL_SECONDS",
                defaults.reaper_interval.as_secs(),
            )),
            analyzer_semaphore: env_usize("ANALYZER_SEMAPHORE", defaults.analyzer_semaphore),
            label_semaphore: env_usize("LABEL_SEMAPHORE", defaults.label_semaphore),
            move_malicious_to_quarantine: env_bool(
                "MOVE_MALICIOUS_TO_QUARANTINE",
                defaults.move_malicious_to_quarantine,
            ),
            read_count: defaults.read_count,
            read_block: defaults.read_block,
        }
    }
}
