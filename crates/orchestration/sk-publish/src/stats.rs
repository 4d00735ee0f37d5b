//! Publish statistics and latency samples.

use serde::Serialize;
use sk_types::SeqRange;
use std::time::{Duration, Instant};

/// Counters and timings of the publish worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublishStats {
    pub messages_published: u64,
    pub rows_published: u64,
    pub bytes_published: u64,

    /// Failed publish attempts, retried or not
    pub publish_failures: u64,

    /// Attempts made after a failure
    pub retries: u64,

    /// Time spent inside the broker client
    pub publish_time: Duration,

    /// Wall time the publish thread was alive
    pub thread_time: Duration,
}

impl PublishStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&mut self, rows: u64, bytes: u64, elapsed: Duration) {
        self.messages_published += 1;
        self.rows_published += rows;
        self.bytes_published += bytes;
        self.publish_time += elapsed;
    }

    pub fn record_failure(&mut self, elapsed: Duration) {
        self.publish_failures += 1;
        self.publish_time += elapsed;
    }

    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    /// Published messages per second of publish time.
    pub fn messages_per_second(&self) -> f64 {
        let secs = self.publish_time.as_secs_f64();
        if secs > 0.0 {
            self.messages_published as f64 / secs
        } else {
            0.0
        }
    }
}

/// Time points of one published message.
#[derive(Debug, Clone, Copy)]
pub struct LatencySample {
    pub seq_range: Option<SeqRange>,
    pub rows: usize,

    /// Ingestion of the oldest row
    pub received: Instant,

    pub serialized: Instant,
    pub published: Instant,
}

impl LatencySample {
    /// Oldest row's wait from ingestion to serialization.
    pub fn convert_latency(&self) -> Duration {
        self.serialized.saturating_duration_since(self.received)
    }

    /// Queueing plus broker time after serialization.
    pub fn publish_latency(&self) -> Duration {
        self.published.saturating_duration_since(self.serialized)
    }

    /// Ingestion to broker hand-off.
    pub fn total(&self) -> Duration {
        self.published.saturating_duration_since(self.received)
    }
}

/// Latency summary over a set of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub min: Duration,
    pub mean: Duration,
    pub max: Duration,
}

impl LatencySummary {
    pub fn from_samples(samples: &[LatencySample]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let totals = samples.iter().map(LatencySample::total);
        let min = totals.clone().min().unwrap_or_default();
        let max = totals.clone().max().unwrap_or_default();
        let sum: Duration = totals.sum();
        Self {
            samples: samples.len(),
            min,
            mean: sum / samples.len() as u32,
            max,
        }
    }
}
