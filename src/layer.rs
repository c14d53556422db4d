//! `tracing` integration: forwards events to a [`DatadogHook`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_log::NormalizeEvent;
use tracing_subscriber::layer::{Context, Layer};

use crate::entry::{LogEntry, LogLevel};
use crate::hook::DatadogHook;

/// Event targets never forwarded. Shipping the hook's own diagnostics, or
/// those of the HTTP stack it drives, would feed back into the batch.
/// Records bridged from the `log` crate are matched on their original target.
const IGNORED_TARGETS: &[&str] = &[
    env!("CARGO_CRATE_NAME"),
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
];

fn is_ignored(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|prefix| {
        target
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

/// A [`Layer`] that turns every accepted event into a [`LogEntry`].
///
/// ```no_run
/// use std::sync::Arc;
/// use datadog_logs_hook::{Config, DatadogHook, DatadogLayer};
/// use tracing_subscriber::prelude::*;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let hook = Arc::new(DatadogHook::from_config(Config::from_env()?)?);
/// tracing_subscriber::registry()
///     .with(DatadogLayer::new(Arc::clone(&hook)))
///     .init();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DatadogLayer {
    hook: Arc<DatadogHook>,
}

impl DatadogLayer {
    pub fn new(hook: Arc<DatadogHook>) -> Self {
        Self { hook }
    }
}

impl<S: Subscriber> Layer<S> for DatadogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let normalized = event.normalized_metadata();
        let metadata = normalized.as_ref().unwrap_or_else(|| event.metadata());
        if is_ignored(metadata.target()) {
            return;
        }

        let level = LogLevel::from(*metadata.level());
        if !self.hook.accepts(level) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut entry = LogEntry::new(level, visitor.message.unwrap_or_default());
        entry.fields = visitor.fields;
        entry
            .fields
            .entry("target".to_string())
            .or_insert_with(|| Value::from(metadata.target()));

        // Encode errors are already reported by the hook in debug mode.
        let _ = self.hook.fire(&entry);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: BTreeMap<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        // `log.target`, `log.file` and friends are carried by the normalized metadata.
        if field.name().starts_with("log.") {
            return;
        }
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::from(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::from(format!("{:?}", value)));
    }
}
