//! Queue configuration, read from the environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `QUEUE_NAME` | `bookmark_analysis` |
//! | `QUEUE_DIR` | `.queue` |
//! | `QUEUE_REDIS_URL` / `QUEUE_REDIS_TOKEN` | unset (file backend) |
//! | `QUEUE_BACKOFF_SECS` | `60` |
//! | `QUEUE_CONCURRENCY` | `5` |
//! | `QUEUE_HANDLER_TIMEOUT_SECS` | `60` (`0` disables) |
//! | `QUEUE_POLL_INTERVAL_SECS` | `60` |
//! | `QUEUE_REDIS_TIMEOUT_MS` | `2000` |

use std::path::PathBuf;
use std::time::Duration;

use crate::jobs::RetryPolicy;

pub const DEFAULT_QUEUE_NAME: &str = "bookmark_analysis";
pub const DEFAULT_QUEUE_DIR: &str = ".queue";

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Connection settings for the remote-list backend.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: String,
    pub token: String,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub queue_name: String,
    /// Directory holding the file backend's documents.
    pub queue_dir: PathBuf,
    /// Present only when both URL and token are set and non-empty.
    pub remote: Option<RemoteConfig>,
    /// Linear backoff unit: retry n waits `n * backoff_unit`.
    pub backoff_unit: Duration,
    /// Max jobs per batch.
    pub concurrency: usize,
    /// Per-job handler timeout; `None` disables it.
    pub handler_timeout: Option<Duration>,
    /// Worker tick interval.
    pub poll_interval: Duration,
    /// Per-command timeout for the remote backend.
    pub remote_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            queue_dir: PathBuf::from(DEFAULT_QUEUE_DIR),
            remote: None,
            backoff_unit: Duration::from_secs(60),
            concurrency: 5,
            handler_timeout: Some(Duration::from_secs(60)),
            poll_interval: Duration::from_secs(60),
            remote_timeout: Duration::from_millis(2000),
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let remote = match (get("QUEUE_REDIS_URL"), get("QUEUE_REDIS_TOKEN")) {
            (Some(url), Some(token)) => Some(RemoteConfig { url, token }),
            _ => None,
        };

        let concurrency = match get("QUEUE_CONCURRENCY") {
            Some(raw) => parse_u64("QUEUE_CONCURRENCY", &raw)? as usize,
            None => defaults.concurrency,
        };
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "QUEUE_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let poll_interval = duration_var(&get, "QUEUE_POLL_INTERVAL_SECS", Duration::from_secs)?
            .unwrap_or(defaults.poll_interval);
        if poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "QUEUE_POLL_INTERVAL_SECS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let handler_timeout = match get("QUEUE_HANDLER_TIMEOUT_SECS") {
            Some(raw) => match parse_u64("QUEUE_HANDLER_TIMEOUT_SECS", &raw)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => defaults.handler_timeout,
        };

        Ok(Self {
            queue_name: get("QUEUE_NAME").unwrap_or(defaults.queue_name),
            queue_dir: get("QUEUE_DIR").map(PathBuf::from).unwrap_or(defaults.queue_dir),
            remote,
            backoff_unit: duration_var(&get, "QUEUE_BACKOFF_SECS", Duration::from_secs)?
                .unwrap_or(defaults.backoff_unit),
            concurrency,
            handler_timeout,
            poll_interval,
            remote_timeout: duration_var(&get, "QUEUE_REDIS_TIMEOUT_MS", Duration::from_millis)?
                .unwrap_or(defaults.remote_timeout),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.backoff_unit)
    }
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn duration_var(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    unit: fn(u64) -> Duration,
) -> Result<Option<Duration>, ConfigError> {
    get(key).map(|raw| parse_u64(key, &raw).map(unit)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = QueueConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.retry_policy(), RetryPolicy::linear(Duration::from_secs(60)));
    }

    #[test]
    fn remote_requires_both_url_and_token() {
        let url_only =
            QueueConfig::from_lookup(lookup(&[("QUEUE_REDIS_URL", "redis://h:6379")])).unwrap();
        assert!(url_only.remote.is_none());

        let blank_token = QueueConfig::from_lookup(lookup(&[
            ("QUEUE_REDIS_URL", "redis://h:6379"),
            ("QUEUE_REDIS_TOKEN", "  "),
        ]))
        .unwrap();
        assert!(blank_token.remote.is_none());

        let both = QueueConfig::from_lookup(lookup(&[
            ("QUEUE_REDIS_URL", "redis://h:6379"),
            ("QUEUE_REDIS_TOKEN", "tok"),
        ]))
        .unwrap();
        assert_eq!(
            both.remote,
            Some(RemoteConfig {
                url: "redis://h:6379".to_string(),
                token: "tok".to_string(),
            })
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let config = QueueConfig::from_lookup(lookup(&[
            ("QUEUE_NAME", "reindex"),
            ("QUEUE_DIR", "/var/lib/marksync"),
            ("QUEUE_BACKOFF_SECS", "5"),
            ("QUEUE_CONCURRENCY", "2"),
            ("QUEUE_HANDLER_TIMEOUT_SECS", "0"),
            ("QUEUE_POLL_INTERVAL_SECS", "10"),
            ("QUEUE_REDIS_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.queue_name, "reindex");
        assert_eq!(config.queue_dir, PathBuf::from("/var/lib/marksync"));
        assert_eq!(config.backoff_unit, Duration::from_secs(5));
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.handler_timeout, None);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.remote_timeout, Duration::from_millis(250));
    }

    #[test]
    fn backoff_unit_longer_than_a_day_is_honoured() {
        let config =
            QueueConfig::from_lookup(lookup(&[("QUEUE_BACKOFF_SECS", "172800")])).unwrap();
        let policy = config.retry_policy();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(172_800));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(345_600));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = QueueConfig::from_lookup(lookup(&[("QUEUE_BACKOFF_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "QUEUE_BACKOFF_SECS", .. }));

        let err = QueueConfig::from_lookup(lookup(&[("QUEUE_CONCURRENCY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "QUEUE_CONCURRENCY", .. }));

        let err =
            QueueConfig::from_lookup(lookup(&[("QUEUE_POLL_INTERVAL_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "QUEUE_POLL_INTERVAL_SECS", .. }));
    }

    #[test]
    fn token_is_redacted_in_debug_output() {
        let remote = RemoteConfig {
            url: "redis://h".to_string(),
            token: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", remote).contains("hunter2"));
    }
}
