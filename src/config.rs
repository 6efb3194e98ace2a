use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

pub const ENV_URL: &str = "WEBAPP_NOTIFIER_URL";
pub const ENV_CONNECT_TIMEOUT: &str = "WEBAPP_NOTIFIER_CONNECT_TIMEOUT";
pub const ENV_READ_TIMEOUT: &str = "WEBAPP_NOTIFIER_READ_TIMEOUT";
pub const ENV_RETRY_COUNT: &str = "WEBAPP_NOTIFIER_RETRY_COUNT";
pub const ENV_CUSTOM_VALUE: &str = "WEBAPP_NOTIFIER_CUSTOM_VALUE";
pub const ENV_RESOLVE_HOSTNAME: &str = "WEBAPP_NOTIFIER_RESOLVE_HOSTNAME";

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5_000;
pub const MIN_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_RETRY_COUNT: u32 = 2;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_024;
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 10_000;

/// Notification settings.
///
/// Every constructor returns a normalized value: timeouts are at least one
/// second and the queue holds at least one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Where notifications are POSTed. `None` makes the notifier inert.
    pub target_url: Option<String>,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,

    /// Retries after the first attempt.
    pub retry_count: u32,

    /// Opaque value echoed in every payload as `custom`.
    pub custom_value: String,

    /// Publish one endpoint URI per host address instead of the hostname.
    pub resolve_hostname: bool,
    pub queue_capacity: usize,
    pub drain_timeout_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            target_url: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            retry_count: DEFAULT_RETRY_COUNT,
            custom_value: String::new(),
            resolve_hostname: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
        }
    }
}

impl NotifierConfig {
    /// Config with the given target and defaults for everything else.
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: Some(target_url.into()),
            ..Self::default()
        }
    }

    /// Read settings from `WEBAPP_NOTIFIER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document)?;
        config.validated()
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        config.target_url = lookup(ENV_URL).filter(|url| !url.trim().is_empty());
        if let Some(value) = lookup(ENV_CONNECT_TIMEOUT) {
            config.connect_timeout_ms = parse_number(ENV_CONNECT_TIMEOUT, &value)?;
        }
        if let Some(value) = lookup(ENV_READ_TIMEOUT) {
            config.read_timeout_ms = parse_number(ENV_READ_TIMEOUT, &value)?;
        }
        if let Some(value) = lookup(ENV_RETRY_COUNT) {
            // Negative counts mean "no retry".
            let count: i64 = parse_number(ENV_RETRY_COUNT, &value)?;
            config.retry_count = u32::try_from(count.max(0)).unwrap_or(u32::MAX);
        }
        if let Some(value) = lookup(ENV_CUSTOM_VALUE) {
            config.custom_value = value;
        }
        if let Some(value) = lookup(ENV_RESOLVE_HOSTNAME) {
            config.resolve_hostname = parse_flag(ENV_RESOLVE_HOSTNAME, &value)?;
        }

        config.validated()
    }

    /// Apply clamps and check the target URL.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.connect_timeout_ms = self.connect_timeout_ms.max(MIN_TIMEOUT_MS);
        self.read_timeout_ms = self.read_timeout_ms.max(MIN_TIMEOUT_MS);
        self.queue_capacity = self.queue_capacity.max(1);

        if let Some(ref url) = self.target_url {
            Url::parse(url).map_err(|source| ConfigError::InvalidUrl {
                url: url.clone(),
                source,
            })?;
        }
        Ok(self)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Total attempts per job, `1 + retry_count`.
    pub fn tries(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_retry_count(self.retry_count)
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
