//! Queue configuration (env-driven, with defaults).

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse {value:?}")]
    Unparseable { key: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables shared by the producer, the retry controller and the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Upper bound on handler attempts per job (including the first).
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Fraction of the exponential delay added at random, `0.0..=1.0`.
    pub backoff_jitter: f64,
    pub lease_duration: Duration,
    pub poll_interval: Duration,
    /// Workers per queue.
    pub worker_concurrency: usize,
    pub handler_timeout: Duration,
    pub reclaim_interval: Duration,
    pub inbound_queue: String,
    pub outbound_queue: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            backoff_jitter: 0.2,
            lease_duration: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            worker_concurrency: 4,
            handler_timeout: Duration::from_secs(25),
            reclaim_interval: Duration::from_secs(5),
            inbound_queue: "inbound".to_string(),
            outbound_queue: "outbound".to_string(),
        }
    }
}

impl QueueConfig {
    /// Load from `CONVOY_*` environment variables, falling back to defaults.
    ///
    /// Durations are given in milliseconds.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = parse(&lookup, "CONVOY_MAX_ATTEMPTS")? {
            cfg.max_attempts = v;
        }
        if let Some(ms) = parse(&lookup, "CONVOY_BASE_BACKOFF_MS")? {
            cfg.base_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "CONVOY_MAX_BACKOFF_MS")? {
            cfg.max_backoff = Duration::from_millis(ms);
        }
        if let Some(v) = parse(&lookup, "CONVOY_BACKOFF_JITTER")? {
            cfg.backoff_jitter = v;
        }
        if let Some(ms) = parse(&lookup, "CONVOY_LEASE_DURATION_MS")? {
            cfg.lease_duration = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "CONVOY_POLL_INTERVAL_MS")? {
            cfg.poll_interval = Duration::from_millis(ms);
        }
        if let Some(v) = parse(&lookup, "CONVOY_WORKER_CONCURRENCY")? {
            cfg.worker_concurrency = v;
        }
        if let Some(ms) = parse(&lookup, "CONVOY_HANDLER_TIMEOUT_MS")? {
            cfg.handler_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "CONVOY_RECLAIM_INTERVAL_MS")? {
            cfg.reclaim_interval = Duration::from_millis(ms);
        }
        if let Some(name) = lookup("CONVOY_INBOUND_QUEUE") {
            cfg.inbound_queue = name;
        }
        if let Some(name) = lookup("CONVOY_OUTBOUND_QUEUE") {
            cfg.outbound_queue = name;
        }

        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "worker_concurrency must be at least 1".into(),
            ));
        }
        if self.base_backoff > self.max_backoff {
            return Err(ConfigError::Invalid(
                "base_backoff exceeds max_backoff".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(ConfigError::Invalid(format!(
                "backoff_jitter must be within 0..=1, got {}",
                self.backoff_jitter
            )));
        }
        if self.lease_duration.is_zero() || self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "lease_duration and poll_interval must be non-zero".into(),
            ));
        }
        if self.handler_timeout >= self.lease_duration {
            return Err(ConfigError::Invalid(
                "handler_timeout must be shorter than lease_duration".into(),
            ));
        }
        if self.reclaim_interval.is_zero() {
            return Err(ConfigError::Invalid("reclaim_interval must be non-zero".into()));
        }
        if self.inbound_queue.trim().is_empty() || self.outbound_queue.trim().is_empty() {
            return Err(ConfigError::Invalid("queue names must be non-empty".into()));
        }
        if self.inbound_queue == self.outbound_queue {
            return Err(ConfigError::Invalid(
                "inbound and outbound queues must differ".into(),
            ));
        }
        Ok(())
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.backoff_jitter = jitter;
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_worker_concurrency(mut self, workers: usize) -> Self {
        self.worker_concurrency = workers;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }
}

fn parse<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: core::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Unparseable { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.max_backoff, Duration::from_secs(300));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_defaults() {
        let cfg = QueueConfig::from_lookup(lookup(&[
            ("CONVOY_MAX_ATTEMPTS", "3"),
            ("CONVOY_BASE_BACKOFF_MS", "500"),
            ("CONVOY_WORKER_CONCURRENCY", " 8 "),
            ("CONVOY_OUTBOUND_QUEUE", "send"),
        ]))
        .unwrap();

        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.base_backoff, Duration::from_millis(500));
        assert_eq!(cfg.worker_concurrency, 8);
        assert_eq!(cfg.outbound_queue, "send");
        assert_eq!(cfg.lease_duration, Duration::from_secs(30));
    }

    #[test]
    fn unparseable_value_is_an_error() {
        let err = QueueConfig::from_lookup(lookup(&[("CONVOY_MAX_ATTEMPTS", "five")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Unparseable {
                key: "CONVOY_MAX_ATTEMPTS",
                value: "five".into()
            }
        );
    }

    #[test]
    fn validation_catches_bad_combinations() {
        let cfg = QueueConfig::default().with_max_attempts(0);
        assert!(cfg.validate().is_err());

        let cfg = QueueConfig::default()
            .with_backoff(Duration::from_secs(10), Duration::from_secs(1));
        assert!(cfg.validate().is_err());

        let cfg = QueueConfig::default().with_handler_timeout(Duration::from_secs(30));
        assert!(cfg.validate().is_err());

        let mut cfg = QueueConfig::default();
        cfg.outbound_queue = cfg.inbound_queue.clone();
        assert!(cfg.validate().is_err());
    }
}
