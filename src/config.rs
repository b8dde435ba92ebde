use crate::PoolError;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

const ENV_SIZE: &str = "WORKER_POOL_SIZE";
const ENV_QUEUE_CAPACITY: &str = "WORKER_POOL_QUEUE_CAPACITY";
const ENV_MAX_WALL_CLOCK_MS: &str = "WORKER_POOL_MAX_WALL_CLOCK_MS";
const ENV_THREAD_PREFIX: &str = "WORKER_POOL_THREAD_PREFIX";

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of workers (default: available parallelism)
    pub size: NonZeroUsize,
    /// Maximum number of tasks waiting for a worker (default: unbounded)
    /// Running tasks don't count.
    pub queue_capacity: Option<NonZeroUsize>,
    /// Maximum wall-clock time per task in milliseconds (default: 0 = disabled)
    pub max_wall_clock_time_ms: u64,
    /// Worker thread name prefix, the worker id is appended
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            queue_capacity: None,
            max_wall_clock_time_ms: 0,
            thread_name_prefix: "pool-worker".to_string(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with a fixed number of workers
    pub fn new(size: NonZeroUsize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    /// Set the number of workers (clamped to at least 1)
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        self
    }

    /// Bound the queue; 0 removes the bound
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = NonZeroUsize::new(capacity);
        self
    }

    /// Set the per-task wall-clock limit; 0 disables it
    pub fn with_max_wall_clock_time_ms(mut self, ms: u64) -> Self {
        self.max_wall_clock_time_ms = ms;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Wall-clock limit as a duration, `None` when disabled
    pub fn wall_clock_limit(&self) -> Option<Duration> {
        (self.max_wall_clock_time_ms > 0).then(|| Duration::from_millis(self.max_wall_clock_time_ms))
    }

    /// Load configuration from `WORKER_POOL_*` environment variables,
    /// falling back to defaults for unset ones
    pub fn from_env() -> Result<Self, PoolError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Same as [`PoolConfig::from_env`] with a custom variable lookup
    pub fn from_env_with<F>(lookup: F) -> Result<Self, PoolError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_SIZE) {
            config.size = parse_var::<NonZeroUsize>(ENV_SIZE, &raw)?;
        }

        if let Some(raw) = lookup(ENV_QUEUE_CAPACITY) {
            config.queue_capacity = NonZeroUsize::new(parse_var::<usize>(ENV_QUEUE_CAPACITY, &raw)?);
        }

        if let Some(raw) = lookup(ENV_MAX_WALL_CLOCK_MS) {
            config.max_wall_clock_time_ms = parse_var(ENV_MAX_WALL_CLOCK_MS, &raw)?;
        }

        if let Some(prefix) = lookup(ENV_THREAD_PREFIX) {
            config.thread_name_prefix = prefix;
        }

        Ok(config)
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T, PoolError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| PoolError::Config(format!("{key}={raw:?}: {e}")))
}
