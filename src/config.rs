//! Configuration types for fetch-dispatch

use crate::error::{Error, Result};
use crate::retry::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Request execution configuration (timeouts, pool size, fan-out width)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-attempt timeout for a single transport call (default: 30 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Maximum number of transport calls a client keeps open at once (default: 100)
    ///
    /// This is the connection-pool limit of a [`FetchClient`](crate::client::FetchClient),
    /// shared by every batch that goes through the same client.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum in-flight requests within one dispatch batch (default: 10)
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            max_connections: default_max_connections(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

/// Retry configuration for transient transport failures
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of retries after the first attempt (default: 3, i.e. up to 4 attempts)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay after the first failed attempt (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after each failed attempt (default: 2)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Build the backoff policy described by this configuration
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.initial_delay,
            self.backoff_multiplier,
            self.max_retries.saturating_add(1),
        )
    }
}

/// Background task manager configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Capacity of the task event broadcast channel (default: 256)
    ///
    /// Slow subscribers that fall further behind than this lose the oldest events.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// How long [`TaskManager::shutdown`](crate::tasks::TaskManager::shutdown)
    /// waits for cancelled tasks to finish (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// How many terminal outcomes are kept for [`TaskManager::status`](crate::tasks::TaskManager::status)
    /// (default: 1024)
    ///
    /// The oldest outcome is forgotten first. Zero keeps none.
    #[serde(default = "default_max_finished")]
    pub max_finished: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
            shutdown_timeout: default_shutdown_timeout(),
            max_finished: default_max_finished(),
        }
    }
}

/// Main configuration
///
/// Every field has a default, so an empty JSON object is a valid configuration:
///
/// ```
/// use fetch_dispatch::Config;
///
/// let config = Config::from_json("{}").unwrap();
/// assert_eq!(config.fetch.max_concurrent_requests, 10);
/// assert_eq!(config.retry.max_retries, 3);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Request execution settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Retry and backoff settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Background task settings
    #[serde(default)]
    pub tasks: TaskConfig,
}

impl Config {
    /// Parse a configuration from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every setting is usable
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid key.
    pub fn validate(&self) -> Result<()> {
        if self.fetch.timeout.is_zero() {
            return Err(Error::config("timeout", "timeout must be greater than zero"));
        }
        if self.fetch.max_connections == 0 {
            return Err(Error::config(
                "max_connections",
                "max_connections must be at least 1",
            ));
        }
        if self.fetch.max_connections > Semaphore::MAX_PERMITS {
            return Err(Error::config(
                "max_connections",
                format!("max_connections must not exceed {}", Semaphore::MAX_PERMITS),
            ));
        }
        if self.fetch.max_concurrent_requests == 0 {
            return Err(Error::config(
                "max_concurrent_requests",
                "max_concurrent_requests must be at least 1",
            ));
        }
        if self.fetch.max_concurrent_requests > Semaphore::MAX_PERMITS {
            return Err(Error::config(
                "max_concurrent_requests",
                format!(
                    "max_concurrent_requests must not exceed {}",
                    Semaphore::MAX_PERMITS
                ),
            ));
        }
        if self.retry.backoff_multiplier == 0 {
            return Err(Error::config(
                "backoff_multiplier",
                "backoff_multiplier must be at least 1",
            ));
        }
        if self.tasks.event_buffer == 0 {
            return Err(Error::config(
                "event_buffer",
                "event_buffer must be at least 1",
            ));
        }
        if self.tasks.event_buffer > MAX_EVENT_BUFFER {
            return Err(Error::config(
                "event_buffer",
                format!("event_buffer must not exceed {MAX_EVENT_BUFFER}"),
            ));
        }
        Ok(())
    }
}

/// Largest capacity a Tokio broadcast channel accepts
pub(crate) const MAX_EVENT_BUFFER: usize = usize::MAX >> 1;

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_connections() -> usize {
    100
}

fn default_max_concurrent_requests() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_multiplier() -> u32 {
    2
}

fn default_event_buffer() -> usize {
    256
}

fn default_max_finished() -> usize {
    1024
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helper (integer milliseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
