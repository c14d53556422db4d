//! Buffer module for accumulating encoded log lines into intake-sized batches.
//!
//! A single accumulator task owns the in-progress [`Batch`] and is its only
//! writer. It flushes when either:
//! - appending the next line would reach the byte ceiling, or the batch already
//!   holds the maximum entry count (the triggering line starts the next batch)
//! - the flush interval elapses (the batch is flushed even when empty)
//!
//! Flushed batches are handed to a callback by value; the accumulator starts a
//! fresh batch right away and never sees the flushed one again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::constants::{MAX_ARRAY_SIZE, MAX_CONTENT_BYTE_SIZE, MAX_ENTRY_BYTE_SIZE};
use crate::encoder::Encoding;
use crate::stats::Stats;

/// Ceilings a batch must stay under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// A line whose addition would reach this many bytes flushes the batch first
    pub max_bytes: usize,

    /// Maximum number of lines per batch
    pub max_entries: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_bytes: MAX_CONTENT_BYTE_SIZE,
            max_entries: MAX_ARRAY_SIZE,
        }
    }
}

/// An ordered run of framed lines plus their total size in bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    lines: Vec<Vec<u8>>,
    size: usize,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Vec::with_capacity(capacity),
            size: 0,
        }
    }

    /// Build a batch from lines that are already framed.
    pub fn from_lines(lines: Vec<Vec<u8>>) -> Self {
        let size = lines.iter().map(Vec::len).sum();
        Self { lines, size }
    }

    fn push(&mut self, line: Vec<u8>) {
        self.size += line.len();
        self.lines.push(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total bytes of all framed lines.
    pub fn size_bytes(&self) -> usize {
        self.size
    }

    pub fn lines(&self) -> &[Vec<u8>] {
        &self.lines
    }
}

/// Why a batch left the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Next line would reach the byte ceiling
    Size,

    /// Batch already held the maximum entry count
    Count,

    /// Flush interval elapsed
    Interval,

    /// Explicit flush or shutdown
    Manual,
}

/// Frame one encoded line for concatenation into a payload.
///
/// Returns `None` for empty or whitespace-only lines. In JSON mode trailing
/// newlines are replaced by a single comma; in text mode a newline is
/// appended when missing.
pub fn frame_line(encoding: Encoding, raw: &[u8]) -> Option<Vec<u8>> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    let mut line = raw.to_vec();
    match encoding {
        Encoding::Json => {
            while line.last() == Some(&b'\n') {
                line.pop();
            }
            line.push(b',');
        }
        Encoding::Text => {
            if line.last() != Some(&b'\n') {
                line.push(b'\n');
            }
        }
    }
    Some(line)
}

/// Synchronous batching state machine driven by [`accumulator_task`].
#[derive(Debug)]
pub struct Accumulator {
    encoding: Encoding,
    limits: BatchLimits,
    current: Batch,
    stats: Arc<Stats>,
    debug: bool,
}

impl Accumulator {
    pub fn new(encoding: Encoding, limits: BatchLimits, stats: Arc<Stats>) -> Self {
        Self {
            encoding,
            limits,
            current: Batch::with_capacity(limits.max_entries),
            stats,
            debug: false,
        }
    }

    /// Emit flush and oversize diagnostics.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Add one encoded line.
    ///
    /// If the line would push the current batch to a ceiling, the current
    /// batch is returned for flushing and the line starts the next one.
    pub fn push(&mut self, raw: &[u8]) -> Option<(Batch, FlushReason)> {
        Stats::incr(&self.stats.lines_received);

        let Some(line) = frame_line(self.encoding, raw) else {
            Stats::incr(&self.stats.lines_discarded);
            return None;
        };

        if line.len() > MAX_ENTRY_BYTE_SIZE {
            Stats::incr(&self.stats.lines_oversized);
            if self.debug {
                warn!(
                    line_bytes = line.len(),
                    max_entry_bytes = MAX_ENTRY_BYTE_SIZE,
                    "Log line exceeds the per-entry intake limit"
                );
            }
        }

        let reason = if self.current.size + line.len() >= self.limits.max_bytes {
            Some(FlushReason::Size)
        } else if self.current.len() >= self.limits.max_entries {
            Some(FlushReason::Count)
        } else {
            None
        };

        let flushed = match reason {
            Some(reason) if !self.current.is_empty() => Some((self.flush(reason), reason)),
            _ => None,
        };

        self.current.push(line);
        flushed
    }

    /// Take the current batch, leaving a fresh empty one in its place.
    pub fn flush(&mut self, reason: FlushReason) -> Batch {
        let counter = match reason {
            FlushReason::Size => &self.stats.size_flushes,
            FlushReason::Count => &self.stats.count_flushes,
            FlushReason::Interval => &self.stats.time_flushes,
            FlushReason::Manual => &self.stats.manual_flushes,
        };
        Stats::incr(counter);

        std::mem::replace(
            &mut self.current,
            Batch::with_capacity(self.limits.max_entries),
        )
    }

    /// Number of lines in the current batch.
    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.current.size
    }
}

/// Messages accepted by the accumulator task.
#[derive(Debug)]
pub enum Command {
    /// One encoded line from a producer
    Line(Vec<u8>),

    /// Flush now; the sender is notified once the batch has been handed off
    Flush(oneshot::Sender<()>),

    /// Stop accepting lines, flush what is buffered and exit
    Shutdown,
}

/// Run the accumulation loop until shutdown or until every sender is dropped.
///
/// `on_flush` is called synchronously with each completed batch (possibly
/// empty on interval ticks) and must not block; delivery belongs on another
/// task.
pub async fn accumulator_task<F>(
    mut rx: mpsc::UnboundedReceiver<Command>,
    mut accumulator: Accumulator,
    flush_interval: Duration,
    mut on_flush: F,
) where
    F: FnMut(Batch),
{
    let mut ticker = interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        tokio::select! {
            command = rx.recv() => {
                match command {
                    Some(Command::Line(line)) => {
                        if let Some((batch, reason)) = accumulator.push(&line) {
                            if accumulator.debug {
                                debug!(
                                    batch_size = batch.len(),
                                    batch_bytes = batch.size_bytes(),
                                    reason = ?reason,
                                    "Threshold flush triggered"
                                );
                            }
                            on_flush(batch);
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        if accumulator.debug {
                            debug!(batch_size = accumulator.len(), "Manual flush requested");
                        }
                        on_flush(accumulator.flush(FlushReason::Manual));
                        let _ = ack.send(());
                    }
                    Some(Command::Shutdown) => {
                        rx.close();
                        drain_closed(&mut rx, &mut accumulator, &mut on_flush).await;
                        return;
                    }
                    None => {
                        drain_closed(&mut rx, &mut accumulator, &mut on_flush).await;
                        return;
                    }
                }
            }

            _ = ticker.tick() => {
                if accumulator.debug {
                    debug!(
                        batch_size = accumulator.len(),
                        interval_secs = flush_interval.as_secs(),
                        "Time-based flush triggered"
                    );
                }
                on_flush(accumulator.flush(FlushReason::Interval));
            }
        }
    }
}

/// Consume whatever was queued before the channel closed, then flush.
async fn drain_closed<F>(
    rx: &mut mpsc::UnboundedReceiver<Command>,
    accumulator: &mut Accumulator,
    on_flush: &mut F,
) where
    F: FnMut(Batch),
{
    while let Some(command) = rx.recv().await {
        match command {
            Command::Line(line) => {
                if let Some((batch, _)) = accumulator.push(&line) {
                    on_flush(batch);
                }
            }
            Command::Flush(ack) => {
                on_flush(accumulator.flush(FlushReason::Manual));
                let _ = ack.send(());
            }
            Command::Shutdown => {}
        }
    }

    if accumulator.debug {
        info!(
            remaining = accumulator.len(),
            "Intake closed, flushing remaining log lines"
        );
    }
    on_flush(accumulator.flush(FlushReason::Manual));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_accumulator(limits: BatchLimits) -> (Accumulator, Arc<Stats>) {
        let stats = Arc::new(Stats::default());
        (
            Accumulator::new(Encoding::Json, limits, stats.clone()),
            stats,
        )
    }

    fn collect_batches() -> (
        impl FnMut(Batch),
        mpsc::UnboundedReceiver<Batch>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            move |batch: Batch| {
                let _ = tx.send(batch);
            },
            rx,
        )
    }

    fn text_lines(batch: &Batch) -> Vec<String> {
        batch
            .lines()
            .iter()
            .map(|l| String::from_utf8(l.clone()).unwrap())
            .collect()
    }

    #[test]
    fn test_frame_line_json_replaces_newlines_with_comma() {
        assert_eq!(
            frame_line(Encoding::Json, b"{\"a\":1}\n\n").unwrap(),
            b"{\"a\":1},".to_vec()
        );
        assert_eq!(
            frame_line(Encoding::Json, b"{\"a\":1}").unwrap(),
            b"{\"a\":1},".to_vec()
        );
    }

    #[test]
    fn test_frame_line_text_appends_missing_newline() {
        assert_eq!(frame_line(Encoding::Text, b"hello").unwrap(), b"hello\n".to_vec());
        assert_eq!(frame_line(Encoding::Text, b"hello\n").unwrap(), b"hello\n".to_vec());
    }

    #[test]
    fn test_frame_line_rejects_blank() {
        assert!(frame_line(Encoding::Json, b"").is_none());
        assert!(frame_line(Encoding::Text, b"  \n\t").is_none());
    }

    #[test]
    fn test_blank_lines_never_batched() {
        let (mut acc, stats) = json_accumulator(BatchLimits {
            max_bytes: 10,
            max_entries: 1,
        });

        assert!(acc.push(b"").is_none());
        assert!(acc.push(b"   \n").is_none());
        assert!(acc.is_empty());

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.lines_received, 2);
        assert_eq!(snapshot.lines_discarded, 2);
        assert_eq!(snapshot.size_flushes + snapshot.count_flushes, 0);
    }

    #[test]
    fn test_byte_ceiling_flushes_before_appending() {
        // Each framed line is 10 bytes: 9 chars plus the comma.
        let (mut acc, stats) = json_accumulator(BatchLimits {
            max_bytes: 30,
            max_entries: MAX_ARRAY_SIZE,
        });

        assert!(acc.push(b"\"aaaaaaa\"").is_none());
        assert!(acc.push(b"\"bbbbbbb\"").is_none());
        assert_eq!(acc.size_bytes(), 20);

        // 20 + 10 reaches the ceiling: flush the first two, keep the third.
        let (batch, reason) = acc.push(b"\"ccccccc\"").expect("should flush");
        assert_eq!(reason, FlushReason::Size);
        assert_eq!(text_lines(&batch), vec!["\"aaaaaaa\",", "\"bbbbbbb\","]);
        assert_eq!(batch.size_bytes(), 20);

        assert_eq!(acc.len(), 1);
        assert_eq!(acc.size_bytes(), 10);
        assert_eq!(stats.snapshot().size_flushes, 1);
    }

    #[test]
    fn test_byte_ceiling_with_production_limit() {
        let (mut acc, _) = json_accumulator(BatchLimits::default());
        let big = vec![b'x'; 1024 * 1024 - 1];

        // Framed lines are exactly 1MiB; the fifth one would reach the ceiling.
        let mut flushed = Vec::new();
        for _ in 0..6 {
            if let Some((batch, _)) = acc.push(&big) {
                flushed.push(batch);
            }
        }
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].len(), 4);
        assert!(flushed[0].size_bytes() < MAX_CONTENT_BYTE_SIZE);
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn test_count_ceiling_flushes_first_500() {
        let (mut acc, stats) = json_accumulator(BatchLimits::default());

        for i in 0..MAX_ARRAY_SIZE {
            assert!(acc.push(format!("{{\"i\":{}}}", i).as_bytes()).is_none());
        }
        assert_eq!(acc.len(), MAX_ARRAY_SIZE);

        let (batch, reason) = acc.push(b"{\"i\":500}").expect("501st line flushes");
        assert_eq!(reason, FlushReason::Count);
        assert_eq!(batch.len(), MAX_ARRAY_SIZE);
        assert_eq!(batch.lines()[0], b"{\"i\":0},".to_vec());
        assert_eq!(batch.lines()[499], b"{\"i\":499},".to_vec());

        assert_eq!(acc.len(), 1);
        assert_eq!(stats.snapshot().count_flushes, 1);
    }

    #[test]
    fn test_oversized_line_is_kept_whole() {
        let (mut acc, stats) = json_accumulator(BatchLimits::default());
        let huge = vec![b'y'; MAX_ENTRY_BYTE_SIZE + 1];

        assert!(acc.push(&huge).is_none());
        assert_eq!(acc.size_bytes(), MAX_ENTRY_BYTE_SIZE + 2);
        assert_eq!(stats.snapshot().lines_oversized, 1);
    }

    #[test]
    fn test_flush_leaves_fresh_batch() {
        let stats = Arc::new(Stats::default());
        let mut acc = Accumulator::new(Encoding::Text, BatchLimits::default(), stats);
        acc.push(b"one");
        acc.push(b"two\n");

        let batch = acc.flush(FlushReason::Manual);
        assert_eq!(text_lines(&batch), vec!["one\n", "two\n"]);
        assert!(acc.is_empty());
        assert_eq!(acc.size_bytes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_flushes_once_per_interval_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(Stats::default());
        let acc = Accumulator::new(Encoding::Text, BatchLimits::default(), stats.clone());
        let (on_flush, mut flushed) = collect_batches();

        let handle = tokio::spawn(accumulator_task(rx, acc, Duration::from_secs(10), on_flush));

        for round in 0..3 {
            for i in 0..4 {
                tx.send(Command::Line(format!("r{} l{}", round, i).into_bytes()))
                    .unwrap();
            }
            // Wake just after the tick so its flush has already run.
            tokio::time::sleep(Duration::from_millis(10_001)).await;
            tokio::task::yield_now().await;

            let batch = flushed.try_recv().expect("one flush per interval");
            assert_eq!(
                text_lines(&batch),
                (0..4).map(|i| format!("r{} l{}\n", round, i)).collect::<Vec<_>>()
            );
            assert!(flushed.try_recv().is_err(), "only one flush per interval");
        }

        assert_eq!(stats.snapshot().time_flushes, 3);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_ticks_with_empty_batch() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let acc = Accumulator::new(Encoding::Json, BatchLimits::default(), Arc::new(Stats::default()));
        let (on_flush, mut flushed) = collect_batches();

        let handle = tokio::spawn(accumulator_task(rx, acc, Duration::from_secs(5), on_flush));
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        let batch = flushed.try_recv().expect("tick flushes even when empty");
        assert!(batch.is_empty());
        handle.abort();
    }

    #[tokio::test]
    async fn test_task_threshold_flush_without_waiting_for_tick() {
        let (tx, rx) = mpsc::unbounded_channel();
        let limits = BatchLimits {
            max_bytes: MAX_CONTENT_BYTE_SIZE,
            max_entries: 2,
        };
        let acc = Accumulator::new(Encoding::Json, limits, Arc::new(Stats::default()));
        let (on_flush, mut flushed) = collect_batches();

        let handle = tokio::spawn(accumulator_task(rx, acc, Duration::from_secs(60), on_flush));
        for i in 0..3 {
            tx.send(Command::Line(format!("{{\"n\":{}}}", i).into_bytes())).unwrap();
        }

        let batch = tokio::time::timeout(Duration::from_millis(500), flushed.recv())
            .await
            .expect("should flush quickly")
            .expect("should get batch");
        assert_eq!(batch.len(), 2);
        handle.abort();
    }

    #[tokio::test]
    async fn test_task_manual_flush_acknowledges() {
        let (tx, rx) = mpsc::unbounded_channel();
        let acc = Accumulator::new(Encoding::Text, BatchLimits::default(), Arc::new(Stats::default()));
        let (on_flush, mut flushed) = collect_batches();

        let handle = tokio::spawn(accumulator_task(rx, acc, Duration::from_secs(60), on_flush));
        tx.send(Command::Line(b"pending".to_vec())).unwrap();

        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(Command::Flush(ack_tx)).unwrap();
        ack_rx.await.expect("flush acknowledged");

        let batch = flushed.try_recv().expect("batch handed off before ack");
        assert_eq!(text_lines(&batch), vec!["pending\n"]);
        handle.abort();
    }

    #[tokio::test]
    async fn test_task_shutdown_drains_queued_lines() {
        let (tx, rx) = mpsc::unbounded_channel();
        let acc = Accumulator::new(Encoding::Text, BatchLimits::default(), Arc::new(Stats::default()));
        let (on_flush, mut flushed) = collect_batches();

        tx.send(Command::Line(b"a".to_vec())).unwrap();
        tx.send(Command::Shutdown).unwrap();
        tx.send(Command::Line(b"b".to_vec())).unwrap();

        accumulator_task(rx, acc, Duration::from_secs(60), on_flush).await;

        let batch = flushed.try_recv().expect("final flush");
        assert_eq!(text_lines(&batch), vec!["a\n", "b\n"]);
        assert!(tx.send(Command::Line(b"c".to_vec())).is_err());
    }

    #[tokio::test]
    async fn test_task_exits_when_senders_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let acc = Accumulator::new(Encoding::Json, BatchLimits::default(), Arc::new(Stats::default()));
        let (on_flush, mut flushed) = collect_batches();

        tx.send(Command::Line(b"{\"last\":true}".to_vec())).unwrap();
        drop(tx);

        tokio::time::timeout(
            Duration::from_millis(500),
            accumulator_task(rx, acc, Duration::from_secs(60), on_flush),
        )
        .await
        .expect("task should exit");

        let batch = flushed.try_recv().expect("final flush");
        assert_eq!(batch.len(), 1);
    }
}
