//! Turns flushed batches into wire payloads and delivers each on its own task.

use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::buffer::Batch;
use crate::client::DeliveryClient;
use crate::encoder::Encoding;

/// Serialized body of one intake request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    body: Vec<u8>,
    encoding: Encoding,
    lines: usize,
}

impl Payload {
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_type(&self) -> &'static str {
        self.encoding.content_type()
    }

    /// Number of log lines carried.
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Body size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.body.len()
    }
}

/// Serialize a batch for the given encoding.
///
/// JSON lines are comma-terminated by the buffer, so the concatenation only
/// needs its trailing comma dropped and brackets added. Text lines are already
/// newline-terminated and are sent as is. Empty batches yield `None`.
pub fn build_payload(encoding: Encoding, batch: Batch) -> Option<Payload> {
    if batch.is_empty() || batch.size_bytes() == 0 {
        return None;
    }

    let lines = batch.len();
    let mut body = Vec::with_capacity(batch.size_bytes() + 2);
    if encoding.is_json() {
        body.push(b'[');
    }
    for line in batch.lines() {
        body.extend_from_slice(line);
    }
    if encoding.is_json() {
        if body.last() == Some(&b',') {
            body.pop();
        }
        body.push(b']');
    }

    Some(Payload {
        body,
        encoding,
        lines,
    })
}

/// Hands batches to the delivery client without blocking the caller.
///
/// Every delivery runs on its own task; deliveries of different batches run
/// concurrently and may complete out of order.
pub struct Dispatcher {
    client: Arc<DeliveryClient>,
    encoding: Encoding,
    tracker: TaskTracker,
    debug: bool,
}

impl Dispatcher {
    pub fn new(client: Arc<DeliveryClient>, encoding: Encoding) -> Self {
        Self {
            client,
            encoding,
            tracker: TaskTracker::new(),
            debug: false,
        }
    }

    /// Log each dispatch and every batch that was not delivered.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Build the payload and spawn its delivery. Empty batches are ignored.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, batch: Batch) {
        let Some(payload) = build_payload(self.encoding, batch) else {
            return;
        };

        let debug = self.debug;
        if debug {
            debug!(
                lines = payload.lines(),
                payload_bytes = payload.size_bytes(),
                "Dispatching log batch"
            );
        }

        let client = Arc::clone(&self.client);
        self.tracker.spawn(async move {
            let outcome = client.deliver(&payload).await;
            if debug && !outcome.is_delivered() {
                warn!(
                    lines = payload.lines(),
                    outcome = ?outcome,
                    "Log batch was not delivered"
                );
            }
        });
    }

    /// Deliveries spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting new deliveries and wait for in-flight ones to finish.
    pub async fn close(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
