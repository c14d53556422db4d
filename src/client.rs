//! HTTP client module for posting log payloads to the Datadog intake.
//!
//! One POST is made per attempt against `https://{host}/v1/input`. Any
//! transport error or a status of 400 and above counts as a failed attempt and
//! is retried according to the configured [`RetryPolicy`]. Outcomes are
//! reported back to the dispatcher only; the log producer never sees them.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::config::{Config, Metadata};
use crate::constants::{API_KEY_HEADER, BASE_PATH, CHARSET_HEADER, CHARSET_UTF8};
use crate::dispatcher::Payload;
use crate::retry::{retry, RetryOutcome, RetryPolicy, Retryable};
use crate::stats::Stats;

/// Errors that can occur while building or sending intake requests.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configured host does not form a valid intake URL
    #[error("invalid intake URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Client configuration error
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    /// Transport-level failure, or a request that could not be built
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Intake answered with a status of 400 or above
    #[error("intake responded with status {0}")]
    Status(StatusCode),
}

impl Retryable for ClientError {
    fn is_retryable(&self) -> bool {
        match self {
            ClientError::Request(e) => !e.is_builder(),
            ClientError::Status(_) => true,
            ClientError::InvalidUrl { .. } | ClientError::Build(_) => false,
        }
    }
}

/// Result of delivering one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { status: StatusCode, attempts: u32 },

    /// Every allowed attempt failed
    GaveUp { attempts: u32, last_error: String },

    /// The request could not be sent at all; retrying would not help
    Dropped { error: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Build the intake URL for a host, with metadata as query parameters.
///
/// A bare host gets the `https` scheme. A host that already carries a scheme
/// (a local agent or proxy) is used as is.
pub fn intake_url(host: &str, metadata: &Metadata) -> Result<Url, ClientError> {
    let base = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    };

    let mut url = Url::parse(&base).map_err(|source| ClientError::InvalidUrl {
        url: base.clone(),
        source,
    })?;

    let path = format!("{}{}", url.path().trim_end_matches('/'), BASE_PATH);
    url.set_path(&path);

    let tags = metadata.tags.join(",");
    let params = [
        ("ddsource", metadata.source.as_str()),
        ("service", metadata.service.as_str()),
        ("hostname", metadata.hostname.as_str()),
        ("ddtags", tags.as_str()),
    ];
    if params.iter().any(|(_, value)| !value.is_empty()) {
        let mut query = url.query_pairs_mut();
        for (key, value) in params.iter().filter(|(_, value)| !value.is_empty()) {
            query.append_pair(key, value);
        }
    }

    Ok(url)
}

/// HTTP client for the Datadog log intake.
///
/// The underlying reqwest client is reused across deliveries for connection
/// pooling, so one `DeliveryClient` is shared by every delivery task.
pub struct DeliveryClient {
    /// The underlying HTTP client
    client: Client,

    /// Fully built intake URL, query included
    intake_url: Url,

    api_key: String,

    retry_policy: RetryPolicy,

    /// Emit diagnostics for failed attempts and give-ups
    debug: bool,

    stats: Arc<Stats>,
}

impl DeliveryClient {
    /// Create a client from the hook configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidUrl` if the host cannot form a URL, and
    /// `ClientError::Build` if the HTTP client cannot be built.
    pub fn new(config: &Config, stats: Arc<Stats>) -> Result<Self, ClientError> {
        let intake_url = intake_url(&config.host, &config.metadata)?;

        let mut builder = Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90));
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(ClientError::Build)?;

        Ok(Self {
            client,
            intake_url,
            api_key: config.api_key.clone(),
            retry_policy: config.retry_policy(),
            debug: config.debug,
            stats,
        })
    }

    /// Deliver one payload, retrying per policy.
    ///
    /// Never fails: the outcome is recorded in the stats and, when debug
    /// diagnostics are on, logged.
    pub async fn deliver(&self, payload: &Payload) -> DeliveryOutcome {
        let outcome = retry(&self.retry_policy, |attempt| self.send_request(payload, attempt)).await;

        Stats::add(
            &self.stats.retries,
            u64::from(outcome.attempts().saturating_sub(1)),
        );

        match outcome {
            RetryOutcome::Succeeded { value, attempts } => {
                Stats::incr(&self.stats.batches_delivered);
                if self.debug {
                    debug!(
                        status = %value,
                        attempts = attempts,
                        lines = payload.lines(),
                        "Delivered log batch"
                    );
                }
                DeliveryOutcome::Delivered {
                    status: value,
                    attempts,
                }
            }
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => {
                Stats::incr(&self.stats.batches_dropped);
                if self.debug {
                    error!(
                        error = %last_error,
                        attempts = attempts,
                        lines = payload.lines(),
                        "Giving up on log batch"
                    );
                }
                DeliveryOutcome::GaveUp {
                    attempts,
                    last_error: last_error.to_string(),
                }
            }
            RetryOutcome::Aborted { error, .. } => {
                Stats::incr(&self.stats.batches_dropped);
                if self.debug {
                    error!(
                        error = %error,
                        lines = payload.lines(),
                        "Dropping log batch: request could not be sent"
                    );
                }
                DeliveryOutcome::Dropped {
                    error: error.to_string(),
                }
            }
        }
    }

    /// Send a single HTTP request without retry logic.
    async fn send_request(&self, payload: &Payload, attempt: u32) -> Result<StatusCode, ClientError> {
        let result = self.post(payload).await;

        if let Err(e) = &result {
            Stats::incr(&self.stats.failed_attempts);
            if self.debug {
                warn!(
                    error = %e,
                    attempt = attempt + 1,
                    "Log delivery attempt failed"
                );
            }
        }
        result
    }

    async fn post(&self, payload: &Payload) -> Result<StatusCode, ClientError> {
        let response = self
            .client
            .post(self.intake_url.clone())
            .header(API_KEY_HEADER, self.api_key.as_str())
            .header(CONTENT_TYPE, payload.content_type())
            .header(CHARSET_HEADER, CHARSET_UTF8)
            .body(payload.body().to_vec())
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() < 400 {
            Ok(status)
        } else {
            Err(ClientError::Status(status))
        }
    }
}
