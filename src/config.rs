//! Configuration module for the Datadog logs hook.
//!
//! Configuration is fixed when the hook is built. It can be assembled in code
//! with [`Config::new`] and the `with_*` setters, or loaded from environment
//! variables with [`Config::from_env`].

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::constants::{DATADOG_US_HOST, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_RETRY};
use crate::encoder::Encoding;
use crate::entry::LogLevel;
use crate::retry::{Backoff, RetryLimit, RetryPolicy};

const ENV_HOST: &str = "DATADOG_HOST";
const ENV_API_KEY: &str = "DATADOG_API_KEY";
const ENV_LOG_FORMAT: &str = "DATADOG_LOG_FORMAT";
const ENV_FLUSH_INTERVAL_SECS: &str = "DATADOG_FLUSH_INTERVAL_SECS";
const ENV_MAX_RETRY: &str = "DATADOG_MAX_RETRY";
const ENV_SOURCE: &str = "DATADOG_SOURCE";
const ENV_SERVICE: &str = "DATADOG_SERVICE";
const ENV_HOSTNAME: &str = "DATADOG_HOSTNAME";
const ENV_TAGS: &str = "DATADOG_TAGS";
const ENV_MIN_LEVEL: &str = "DATADOG_MIN_LEVEL";
const ENV_DEBUG: &str = "DATADOG_DEBUG";
const ENV_REQUEST_TIMEOUT_SECS: &str = "DATADOG_REQUEST_TIMEOUT_SECS";

/// Optional attributes sent with every request as query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// `ddsource`
    pub source: String,

    /// `service`
    pub service: String,

    /// `hostname`
    pub hostname: String,

    /// `ddtags`, comma-joined on the wire
    pub tags: Vec<String>,
}

/// Configuration for the Datadog logs hook.
///
/// Environment variables read by [`Config::from_env`]:
/// - `DATADOG_HOST`: intake host (default: the US intake)
/// - `DATADOG_API_KEY`: API key (required)
/// - `DATADOG_LOG_FORMAT`: `json` or `text` (default: json)
/// - `DATADOG_FLUSH_INTERVAL_SECS`: seconds between timed flushes (default: 30; zero, negative or invalid values mean default)
/// - `DATADOG_MAX_RETRY`: retries after a failed attempt, negative for unlimited (default: 3)
/// - `DATADOG_SOURCE`, `DATADOG_SERVICE`, `DATADOG_HOSTNAME`: request metadata
/// - `DATADOG_TAGS`: comma separated tags
/// - `DATADOG_MIN_LEVEL`: least severe level shipped (default: debug)
/// - `DATADOG_DEBUG`: emit delivery diagnostics (default: false)
/// - `DATADOG_REQUEST_TIMEOUT_SECS`: per-request timeout (default: client default)
#[derive(Debug, Clone)]
pub struct Config {
    /// Intake host, optionally prefixed with `http://` or `https://`
    pub host: String,

    pub api_key: String,

    /// Line encoding and payload shape
    pub encoding: Encoding,

    /// Interval between timed flushes
    pub flush_interval: Duration,

    /// Retries after the first failed attempt; negative means unlimited
    pub max_retry: i64,

    pub metadata: Metadata,

    /// Least severe level the hook accepts
    pub min_level: LogLevel,

    /// Report failed delivery attempts and give-ups
    pub debug: bool,

    /// Per-request timeout; `None` leaves the HTTP client default
    pub request_timeout: Option<Duration>,

    /// Delay between retries
    pub retry_backoff: Backoff,
}

/// Error type for configuration loading failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Configuration error: {env_var} is required")]
    Missing { env_var: String },

    #[error("Configuration error for {env_var}: {message}")]
    Invalid { env_var: String, message: String },
}

impl ConfigError {
    fn invalid(env_var: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            env_var: env_var.to_string(),
            message: message.into(),
        }
    }
}

impl Config {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the timed flush interval; zero selects the default.
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_max_retry(mut self, max_retry: i64) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_min_level(mut self, min_level: LogLevel) -> Self {
        self.min_level = min_level;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Backoff) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// The flush interval actually used: zero falls back to the default.
    pub fn effective_flush_interval(&self) -> Duration {
        if self.flush_interval.is_zero() {
            DEFAULT_FLUSH_INTERVAL
        } else {
            self.flush_interval
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            limit: RetryLimit::from_max_retry(self.max_retry),
            backoff: self.retry_backoff,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `DATADOG_API_KEY` is missing or empty
    /// - a numeric, level or format variable cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var(ENV_HOST)
            .ok()
            .map(|h| h.trim().trim_end_matches('/').to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DATADOG_US_HOST.to_string());

        let api_key = env::var(ENV_API_KEY)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::Missing {
                env_var: ENV_API_KEY.to_string(),
            })?;

        let encoding = match optional_var(ENV_LOG_FORMAT) {
            Some(value) => value
                .parse::<Encoding>()
                .map_err(|e| ConfigError::invalid(ENV_LOG_FORMAT, e))?,
            None => Encoding::default(),
        };

        // Zero, negative or unparsable intervals fall back to the default.
        let flush_interval = optional_var(ENV_FLUSH_INTERVAL_SECS)
            .and_then(|value| value.parse::<i64>().ok())
            .and_then(|secs| u64::try_from(secs).ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_FLUSH_INTERVAL);

        let max_retry = match optional_var(ENV_MAX_RETRY) {
            Some(value) => parse_number(ENV_MAX_RETRY, &value)?,
            None => DEFAULT_MAX_RETRY,
        };

        let min_level = match optional_var(ENV_MIN_LEVEL) {
            Some(value) => value
                .parse::<LogLevel>()
                .map_err(|e| ConfigError::invalid(ENV_MIN_LEVEL, e))?,
            None => LogLevel::Debug,
        };

        let debug = match optional_var(ENV_DEBUG) {
            Some(value) => parse_bool(ENV_DEBUG, &value)?,
            None => false,
        };

        let request_timeout = match optional_var(ENV_REQUEST_TIMEOUT_SECS) {
            Some(value) => Some(Duration::from_secs(parse_number(
                ENV_REQUEST_TIMEOUT_SECS,
                &value,
            )?)),
            None => None,
        };

        let metadata = Metadata {
            source: optional_var(ENV_SOURCE).unwrap_or_default(),
            service: optional_var(ENV_SERVICE).unwrap_or_default(),
            hostname: optional_var(ENV_HOSTNAME).unwrap_or_default(),
            tags: optional_var(ENV_TAGS)
                .map(|tags| {
                    tags.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        };

        Ok(Self {
            host,
            api_key,
            encoding,
            flush_interval,
            max_retry,
            metadata,
            min_level,
            debug,
            request_timeout,
            retry_backoff: Backoff::None,
        })
    }
}

impl Default for Config {
    /// US intake, JSON lines, 30s interval, 3 retries, no API key.
    fn default() -> Self {
        Self {
            host: DATADOG_US_HOST.to_string(),
            api_key: String::new(),
            encoding: Encoding::Json,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_retry: DEFAULT_MAX_RETRY,
            metadata: Metadata::default(),
            min_level: LogLevel::Debug,
            debug: false,
            request_timeout: None,
            retry_backoff: Backoff::None,
        }
    }
}

/// Read a variable, treating unset and blank the same.
fn optional_var(env_var: &str) -> Option<String> {
    env::var(env_var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(env_var: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid(env_var, format!("'{}' is not a valid number", value)))
}

fn parse_bool(env_var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(
            env_var,
            format!("'{}' is not a valid boolean", value),
        )),
    }
}
