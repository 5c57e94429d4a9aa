//! Environment-driven configuration, in the `env::var(KEY).unwrap_or`
//! style the rest of this stack's deployments use rather than a
//! config-file loader: every knob has a default, every override comes
//! from one well-known env var.

use std::env;
use std::time::Duration;

/// Process-wide queue configuration. `from_env()` is the only
/// constructor meant for production use; `QueueConfig::default()`
/// exists for tests that don't want to touch the environment.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// `DB_URL` - Postgres connection string. Unset when running on
    /// the `memory` backend.
    pub db_url: Option<String>,
    /// `WORKER_CONCURRENCY` - fiber count per worker pool. Default 3.
    pub worker_concurrency: usize,
    /// `WORKER_POLL_INTERVAL_MS` - base poll delay between empty
    /// dequeues. Default 2000.
    pub worker_poll_interval: Duration,
    /// `JOB_RETENTION_DAYS` - how long terminal rows survive before
    /// the reaper deletes them. Default 7.
    pub job_retention: Duration,
    /// `HANDLER_TIMEOUT_DEFAULT_SEC` - fallback per-handler timeout
    /// for job types that don't override it. Default 300.
    pub handler_timeout_default: Duration,
    /// `REAPER_INTERVAL_SEC` - how often the reaper sweeps. Default 60.
    pub reaper_interval: Duration,
    /// `PAUSED` - initial pool pause state on startup. Default false.
    pub paused: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_url: None,
            worker_concurrency: 3,
            worker_poll_interval: Duration::from_millis(2000),
            job_retention: Duration::from_secs(7 * 24 * 3600),
            handler_timeout_default: Duration::from_secs(300),
            reaper_interval: Duration::from_secs(60),
            paused: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl QueueConfig {
    /// Reads every knob from its env var, falling back to the default
    /// for any unset or unparseable value. Never fails: a malformed
    /// `WORKER_CONCURRENCY=nope` silently falls back rather than
    /// aborting startup, matching the loader style the rest of this
    /// stack's deployments use.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_url: env::var("DB_URL").ok(),
            worker_concurrency: env_parse("WORKER_CONCURRENCY", defaults.worker_concurrency),
            worker_poll_interval: Duration::from_millis(env_parse(
                "WORKER_POLL_INTERVAL_MS",
                defaults.worker_poll_interval.as_millis() as u64,
            )),
            job_retention: Duration::from_secs(
                env_parse::<u64>("JOB_RETENTION_DAYS", 7) * 24 * 3600,
            ),
            handler_timeout_default: Duration::from_secs(env_parse(
                "HANDLER_TIMEOUT_DEFAULT_SEC",
                defaults.handler_timeout_default.as_secs(),
            )),
            reaper_interval: Duration::from_secs(env_parse(
                "REAPER_INTERVAL_SEC",
                defaults.reaper_interval.as_secs(),
            )),
            paused: env::var("PAUSED").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = QueueConfig::default();
        assert_eq!(config.worker_concurrency, 3);
        assert_eq!(config.worker_poll_interval, Duration::from_millis(2000));
        assert_eq!(config.job_retention, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.handler_timeout_default, Duration::from_secs(300));
        assert_eq!(config.reaper_interval, Duration::from_secs(60));
        assert!(!config.paused);
    }

    #[test]
    fn env_parse_falls_back_on_unparseable_value() {
        env::set_var("QUEUE_CONFIG_TEST_KEY", "not-a-number");
        let value: u64 = env_parse("QUEUE_CONFIG_TEST_KEY", 42);
        assert_eq!(value, 42);
        env::remove_var("QUEUE_CONFIG_TEST_KEY");
    }
}
