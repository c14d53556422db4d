//! Counters shared between the hook, the accumulator task and delivery tasks.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated with relaxed atomics from any task.
#[derive(Debug, Default)]
pub struct Stats {
    pub(crate) lines_received: AtomicU64,
    pub(crate) lines_discarded: AtomicU64,
    pub(crate) lines_oversized: AtomicU64,
    pub(crate) size_flushes: AtomicU64,
    pub(crate) count_flushes: AtomicU64,
    pub(crate) time_flushes: AtomicU64,
    pub(crate) manual_flushes: AtomicU64,
    pub(crate) batches_delivered: AtomicU64,
    pub(crate) batches_dropped: AtomicU64,
    pub(crate) failed_attempts: AtomicU64,
    pub(crate) retries: AtomicU64,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Lines that reached the accumulator
    pub lines_received: u64,

    /// Empty or whitespace-only lines that were never batched
    pub lines_discarded: u64,

    /// Lines above the per-entry soft ceiling (still shipped)
    pub lines_oversized: u64,

    /// Flushes triggered by the byte ceiling
    pub size_flushes: u64,

    /// Flushes triggered by the entry-count ceiling
    pub count_flushes: u64,

    /// Flushes triggered by the interval timer
    pub time_flushes: u64,

    /// Flushes requested explicitly or by shutdown
    pub manual_flushes: u64,

    pub batches_delivered: u64,
    pub batches_dropped: u64,
    pub failed_attempts: u64,
    pub retries: u64,
}

impl Stats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            lines_received: load(&self.lines_received),
            lines_discarded: load(&self.lines_discarded),
            lines_oversized: load(&self.lines_oversized),
            size_flushes: load(&self.size_flushes),
            count_flushes: load(&self.count_flushes),
            time_flushes: load(&self.time_flushes),
            manual_flushes: load(&self.manual_flushes),
            batches_delivered: load(&self.batches_delivered),
            batches_dropped: load(&self.batches_dropped),
            failed_attempts: load(&self.failed_attempts),
            retries: load(&self.retries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = Stats::default();
        Stats::incr(&stats.lines_received);
        Stats::incr(&stats.lines_received);
        Stats::add(&stats.failed_attempts, 4);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.lines_received, 2);
        assert_eq!(snapshot.failed_attempts, 4);
        assert_eq!(snapshot.batches_delivered, 0);
    }
}
