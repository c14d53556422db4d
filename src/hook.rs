//! The log hook: the narrow entry point a logging framework calls per event.
//!
//! [`DatadogHook::fire`] encodes the entry on the caller's thread and queues
//! the line; everything after that (batching, payload building, delivery and
//! retries) happens on background tasks. Only an encoding failure is ever
//! reported back to the caller.

use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::buffer::{accumulator_task, Accumulator, BatchLimits, Command};
use crate::client::{ClientError, DeliveryClient};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::encoder::{encoder_for, EncodeError, LineEncoder};
use crate::entry::{LogEntry, LogLevel};
use crate::stats::{Stats, StatsSnapshot};

/// Errors returned by the hook.
#[derive(Debug, Error)]
pub enum HookError {
    /// The entry could not be rendered; it was dropped
    #[error("unable to encode log entry: {0}")]
    Encode(#[from] EncodeError),

    /// The delivery client could not be built from the configuration
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("the log hook must be created inside a tokio runtime")]
    NoRuntime,
}

/// Batching hook that ships log lines to the Datadog intake.
///
/// # Example
///
/// ```no_run
/// use datadog_logs_hook::{Config, DatadogHook, LogEntry, LogLevel};
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::new("http-intake.logs.datadoghq.com", "api-key");
///     let hook = DatadogHook::from_config(config).expect("Failed to create hook");
///
///     hook.fire(&LogEntry::new(LogLevel::Info, "service started")).ok();
///
///     hook.shutdown().await;
/// }
/// ```
pub struct DatadogHook {
    tx: mpsc::UnboundedSender<Command>,
    encoder: Box<dyn LineEncoder>,
    levels: Vec<LogLevel>,
    debug: bool,
    stats: Arc<Stats>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DatadogHook {
    /// Create a hook using the encoder matching `config.encoding`.
    pub fn from_config(config: Config) -> Result<Self, HookError> {
        let encoder = encoder_for(config.encoding);
        Self::new(config, encoder)
    }

    /// Create a hook with a custom line encoder.
    ///
    /// The encoder's output must match `config.encoding`: one JSON object per
    /// line in JSON mode, any text otherwise.
    ///
    /// # Errors
    ///
    /// Fails if called outside a tokio runtime or if the intake URL or HTTP
    /// client cannot be built.
    pub fn new(config: Config, encoder: Box<dyn LineEncoder>) -> Result<Self, HookError> {
        Self::with_limits(config, encoder, BatchLimits::default())
    }

    /// Like [`DatadogHook::new`], with custom batch ceilings.
    pub fn with_limits(
        config: Config,
        encoder: Box<dyn LineEncoder>,
        limits: BatchLimits,
    ) -> Result<Self, HookError> {
        let runtime = Handle::try_current().map_err(|_| HookError::NoRuntime)?;

        let stats = Arc::new(Stats::default());
        let client = Arc::new(DeliveryClient::new(&config, Arc::clone(&stats))?);
        let debug = config.debug;
        let dispatcher = Dispatcher::new(client, config.encoding).with_debug(debug);
        let accumulator =
            Accumulator::new(config.encoding, limits, Arc::clone(&stats)).with_debug(debug);
        let flush_interval = config.effective_flush_interval();

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = runtime.spawn(async move {
            accumulator_task(rx, accumulator, flush_interval, |batch| {
                dispatcher.dispatch(batch)
            })
            .await;
            dispatcher.close().await;
            if debug {
                info!("Log hook stopped");
            }
        });

        Ok(Self {
            tx,
            encoder,
            levels: config.min_level.and_above(),
            debug,
            stats,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Encode and queue one entry.
    ///
    /// Returns an error only when the entry cannot be encoded. Lines queued
    /// after shutdown are dropped silently.
    pub fn fire(&self, entry: &LogEntry) -> Result<(), HookError> {
        let line = match self.encoder.format(entry) {
            Ok(line) => line,
            Err(e) => {
                if self.debug {
                    warn!(error = %e, "Unable to encode log entry");
                }
                return Err(e.into());
            }
        };

        if self.tx.send(Command::Line(line)).is_err() && self.debug {
            warn!("Log hook is shut down, dropping entry");
        }
        Ok(())
    }

    /// Levels this hook wants to receive, most severe first.
    pub fn levels(&self) -> &[LogLevel] {
        &self.levels
    }

    pub fn accepts(&self, level: LogLevel) -> bool {
        self.levels.contains(&level)
    }

    /// Flush the current batch now.
    ///
    /// Returns once the batch has been handed to a delivery task, not once it
    /// has been delivered.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Flush everything buffered and wait for in-flight deliveries.
    ///
    /// Lines fired after this call are dropped. Every caller, including
    /// concurrent and repeated ones, returns only after the drain is done.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);

        let mut worker = self.worker.lock().await;
        if let Some(handle) = worker.as_mut() {
            let result = handle.await;
            *worker = None;
            if let Err(e) = result {
                if self.debug {
                    warn!(error = %e, "Log hook worker failed during shutdown");
                }
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoding;
    use std::time::Duration;

    fn failing_encoder() -> Box<dyn LineEncoder> {
        Box::new(|_: &LogEntry| -> Result<Vec<u8>, EncodeError> {
            Err(EncodeError::Json(serde_json::from_str::<serde_json::Value>("{").unwrap_err()))
        })
    }

    #[test]
    fn test_requires_runtime() {
        let result = DatadogHook::from_config(Config::new("example.com", "key"));
        assert!(matches!(result, Err(HookError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_invalid_host_fails_construction() {
        let result = DatadogHook::from_config(Config::new("bad host", "key"));
        assert!(matches!(
            result,
            Err(HookError::Client(ClientError::InvalidUrl { .. }))
        ));
    }

    #[tokio::test]
    async fn test_levels_follow_min_level() {
        let config = Config::new("example.com", "key").with_min_level(LogLevel::Warn);
        let hook = DatadogHook::from_config(config).unwrap();

        assert_eq!(
            hook.levels(),
            &[LogLevel::Panic, LogLevel::Fatal, LogLevel::Error, LogLevel::Warn]
        );
        assert!(hook.accepts(LogLevel::Error));
        assert!(!hook.accepts(LogLevel::Info));
    }

    #[tokio::test]
    async fn test_encode_failure_is_reported_to_caller() {
        let config = Config::new("example.com", "key").with_debug(true);
        let hook = DatadogHook::new(config, failing_encoder()).unwrap();

        let result = hook.fire(&LogEntry::new(LogLevel::Info, "boom"));
        assert!(matches!(result, Err(HookError::Encode(_))));
    }

    #[tokio::test]
    async fn test_fire_after_shutdown_still_succeeds() {
        let config = Config::new("example.com", "key")
            .with_encoding(Encoding::Text)
            .with_flush_interval(Duration::from_secs(60));
        let hook = DatadogHook::from_config(config).unwrap();

        hook.shutdown().await;
        hook.shutdown().await;

        assert!(hook.fire(&LogEntry::new(LogLevel::Info, "late")).is_ok());
        assert_eq!(hook.stats().lines_received, 0);
    }

    #[tokio::test]
    async fn test_flush_counts_manual_flush() {
        let config = Config::new("example.com", "key").with_flush_interval(Duration::from_secs(60));
        let hook = DatadogHook::from_config(config).unwrap();

        hook.flush().await;
        assert_eq!(hook.stats().manual_flushes, 1);
    }
}
