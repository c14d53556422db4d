//! Datadog HTTP log intake limits and wire constants.
//!
//! The intake rejects payloads above its size and array ceilings, so the
//! accumulator bounds every batch by [`MAX_CONTENT_BYTE_SIZE`] and
//! [`MAX_ARRAY_SIZE`] before it is handed off for delivery.

use std::time::Duration;

/// Intake host for the Datadog US site.
pub const DATADOG_US_HOST: &str = "http-intake.logs.datadoghq.com";

/// Intake host for the Datadog EU site.
pub const DATADOG_EU_HOST: &str = "http-intake.logs.datadoghq.eu";

/// Path of the log input endpoint.
pub const BASE_PATH: &str = "/v1/input";

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "DD-API-KEY";

pub const CHARSET_HEADER: &str = "charset";
pub const CHARSET_UTF8: &str = "UTF-8";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_PLAIN: &str = "text/plain";

/// Maximum content size per payload: 5MB minus the two array brackets.
pub const MAX_CONTENT_BYTE_SIZE: usize = 5 * 1024 * 1024 - 2;

/// Maximum size for a single log line: 256kB.
///
/// Not enforced by splitting; lines above it are counted and reported.
pub const MAX_ENTRY_BYTE_SIZE: usize = 256 * 1024;

/// Maximum number of entries in one payload array.
pub const MAX_ARRAY_SIZE: usize = 500;

/// Flush interval used when none (or zero) is configured.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Additional attempts after the first failed delivery.
pub const DEFAULT_MAX_RETRY: i64 = 3;
