//! Live pipeline counters.
//!
//! These are observations for draining and progress reporting. The stats of
//! record are the per-thread stats returned when each thread is joined.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size on most modern CPUs (64 bytes).
const CACHE_LINE_SIZE: usize = 64;

/// A cache-line-padded atomic counter.
///
/// Receiver, drones and publisher bump different counters from different
/// threads; padding keeps each counter on its own cache line.
#[repr(C, align(64))]
#[derive(Debug)]
struct PaddedAtomicU64 {
    value: AtomicU64,
    _padding: [u8; CACHE_LINE_SIZE - std::mem::size_of::<AtomicU64>()],
}

impl Default for PaddedAtomicU64 {
    fn default() -> Self {
        Self {
            value: AtomicU64::new(0),
            _padding: [0; CACHE_LINE_SIZE - std::mem::size_of::<AtomicU64>()],
        }
    }
}

impl PaddedAtomicU64 {
    #[inline]
    fn load(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    fn add(&self, val: u64) {
        self.value.fetch_add(val, Ordering::AcqRel);
    }
}

/// Counters shared by every thread of one run.
#[derive(Debug, Default)]
pub struct PipelineProgress {
    received: PaddedAtomicU64,
    received_bytes: PaddedAtomicU64,
    converted: PaddedAtomicU64,
    parse_failures: PaddedAtomicU64,
    dropped_rows: PaddedAtomicU64,
    published_rows: PaddedAtomicU64,
    published_messages: PaddedAtomicU64,
}

impl PipelineProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one item handed to the input queue.
    #[inline]
    pub fn record_received(&self, bytes: u64) {
        self.received.add(1);
        self.received_bytes.add(bytes);
    }

    /// Record one item appended to a batch.
    #[inline]
    pub fn record_converted(&self) {
        self.converted.add(1);
    }

    /// Record one item dropped because it did not parse.
    #[inline]
    pub fn record_parse_failure(&self) {
        self.parse_failures.add(1);
    }

    /// Record rows lost after parsing (oversized batch, closed output queue).
    #[inline]
    pub fn record_dropped(&self, rows: u64) {
        self.dropped_rows.add(rows);
    }

    /// Record one message accepted by the broker.
    #[inline]
    pub fn record_published(&self, rows: u64) {
        self.published_messages.add(1);
        self.published_rows.add(rows);
    }

    #[inline]
    pub fn received(&self) -> u64 {
        self.received.load()
    }

    #[inline]
    pub fn published_rows(&self) -> u64 {
        self.published_rows.load()
    }

    /// Take a point-in-time copy of every counter.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            received: self.received.load(),
            received_bytes: self.received_bytes.load(),
            converted: self.converted.load(),
            parse_failures: self.parse_failures.load(),
            dropped_rows: self.dropped_rows.load(),
            published_rows: self.published_rows.load(),
            published_messages: self.published_messages.load(),
        }
    }
}

/// Point-in-time copy of [`PipelineProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub received: u64,
    pub received_bytes: u64,
    pub converted: u64,
    pub parse_failures: u64,
    pub dropped_rows: u64,
    pub published_rows: u64,
    pub published_messages: u64,
}

impl ProgressSnapshot {
    /// Items received but not yet published, failed or dropped.
    pub fn in_flight(&self) -> u64 {
        self.received
            .saturating_sub(self.published_rows + self.parse_failures + self.dropped_rows)
    }

    /// Every received item has reached a terminal outcome.
    pub fn is_drained(&self) -> bool {
        self.in_flight() == 0
    }
}
