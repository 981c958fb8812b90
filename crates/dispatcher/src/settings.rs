//! Process settings: the queue tunables plus store selection.

use std::time::Duration;

use convoy_queue::{ConfigError, QueueConfig};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Queue(#[from] ConfigError),

    #[error("CONVOY_STORE: unknown backend {0:?} (expected `memory` or `redis`)")]
    UnknownBackend(String),

    #[error("CONVOY_STORE=redis requires REDIS_URL")]
    MissingRedisUrl,
}

/// Which [`QueueStore`](convoy_queue::QueueStore) implementation to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

impl core::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        })
    }
}

impl core::str::FromStr for StoreBackend {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(SettingsError::UnknownBackend(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: StoreBackend,
    pub redis_url: Option<String>,
    /// Completed jobs older than this are purged; `None` keeps them forever.
    pub completed_retention: Option<Duration>,
    pub queue: QueueConfig,
}

const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads `CONVOY_STORE`, `REDIS_URL`, `CONVOY_COMPLETED_RETENTION_MS`
    /// (`0` disables purging) and every `CONVOY_*` queue variable. The queue
    /// configuration is validated.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let queue = QueueConfig::from_lookup(&lookup)?;
        queue.validate()?;

        let backend = match lookup("CONVOY_STORE") {
            Some(v) => v.parse()?,
            None => StoreBackend::default(),
        };
        let redis_url = lookup("REDIS_URL").filter(|url| !url.trim().is_empty());
        if backend == StoreBackend::Redis && redis_url.is_none() {
            return Err(SettingsError::MissingRedisUrl);
        }

        let completed_retention = match lookup("CONVOY_COMPLETED_RETENTION_MS") {
            None => Some(DEFAULT_RETENTION),
            Some(raw) => {
                let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::Unparseable {
                    key: "CONVOY_COMPLETED_RETENTION_MS",
                    value: raw.clone(),
                })?;
                (ms > 0).then(|| Duration::from_millis(ms))
            }
        };

        Ok(Self {
            backend,
            redis_url,
            completed_retention,
            queue,
        })
    }
}
