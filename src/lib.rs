//! Datadog Logs Hook Library
//!
//! Batches structured log lines and ships them to the Datadog HTTP log intake.
//! Batches are flushed when they approach the intake's size or count ceiling,
//! and on a fixed interval; each flush is delivered on its own task with
//! bounded retry.
//!
//! - **config**: Hook configuration, built in code or loaded from the environment
//! - **entry**: Log levels and the structured log entry
//! - **encoder**: JSON and text line encoders
//! - **buffer**: Line framing and the accumulator with size, count and time flushes
//! - **dispatcher**: Payload building and concurrent delivery tasks
//! - **client**: HTTP delivery to the intake with retry
//! - **retry**: Retry limit and backoff policy
//! - **hook**: The entry point a logging framework calls
//! - **layer**: `tracing_subscriber` integration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use datadog_logs_hook::{Config, DatadogHook, DatadogLayer};
//! use tracing_subscriber::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let hook = Arc::new(DatadogHook::from_config(config).expect("Failed to create hook"));
//!
//!     tracing_subscriber::registry()
//!         .with(DatadogLayer::new(Arc::clone(&hook)))
//!         .init();
//!
//!     tracing::info!(order_id = 42, "order placed");
//!
//!     hook.shutdown().await;
//! }
//! ```

pub mod buffer;
pub mod client;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod encoder;
pub mod entry;
pub mod hook;
pub mod layer;
pub mod retry;
pub mod stats;

pub use buffer::{BatchLimits, FlushReason};
pub use client::{ClientError, DeliveryOutcome};
pub use config::{Config, ConfigError, Metadata};
pub use encoder::{EncodeError, Encoding, JsonEncoder, LineEncoder, TextEncoder};
pub use entry::{LogEntry, LogLevel};
pub use hook::{DatadogHook, HookError};
pub use layer::DatadogLayer;
pub use retry::{Backoff, RetryLimit, RetryPolicy};
pub use stats::StatsSnapshot;
