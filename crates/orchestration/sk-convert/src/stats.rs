//! Per-drone conversion statistics.

use serde::Serialize;
use std::iter::Sum;
use std::ops::AddAssign;
use std::time::Duration;

/// Counters and phase timings of one drone, or the sum over several.
///
/// Owned and mutated by a single drone thread; merged only after join.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversionStats {
    /// Items parsed into rows
    pub items_converted: u64,

    /// Items dropped because they did not parse
    pub parse_failures: u64,

    /// JSON bytes consumed (converted and failed items)
    pub json_bytes: u64,

    /// Messages pushed to the output queue
    pub messages: u64,

    /// Serialized bytes pushed to the output queue
    pub message_bytes: u64,

    /// Rows carried by pushed messages
    pub rows_emitted: u64,

    /// Parsed rows lost to serialize failures or a closed output queue
    pub rows_dropped: u64,

    pub parse_time: Duration,
    pub combine_time: Duration,
    pub serialize_time: Duration,
    pub enqueue_time: Duration,

    /// Wall time the drone thread was alive
    pub thread_time: Duration,
}

impl ConversionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a parsed item.
    pub fn record_converted(&mut self, json_bytes: u64, parse_time: Duration) {
        self.items_converted += 1;
        self.json_bytes += json_bytes;
        self.parse_time += parse_time;
    }

    /// Record an item that failed to parse.
    pub fn record_parse_failure(&mut self, json_bytes: u64, parse_time: Duration) {
        self.parse_failures += 1;
        self.json_bytes += json_bytes;
        self.parse_time += parse_time;
    }

    /// Record a message pushed to the output queue.
    pub fn record_message(
        &mut self,
        rows: u64,
        bytes: u64,
        combine_time: Duration,
        serialize_time: Duration,
        enqueue_time: Duration,
    ) {
        self.messages += 1;
        self.rows_emitted += rows;
        self.message_bytes += bytes;
        self.combine_time += combine_time;
        self.serialize_time += serialize_time;
        self.enqueue_time += enqueue_time;
    }

    /// Record parsed rows that never made it into a queued message.
    pub fn record_dropped(&mut self, rows: u64) {
        self.rows_dropped += rows;
    }

    /// Sum of the parse, combine, serialize and enqueue phases.
    pub fn busy_time(&self) -> Duration {
        self.parse_time + self.combine_time + self.serialize_time + self.enqueue_time
    }

    /// Items converted per second of busy time.
    pub fn items_per_second(&self) -> f64 {
        let secs = self.busy_time().as_secs_f64();
        if secs > 0.0 {
            self.items_converted as f64 / secs
        } else {
            0.0
        }
    }

    /// JSON throughput in MiB per second of parse time.
    pub fn parse_mib_per_second(&self) -> f64 {
        let secs = self.parse_time.as_secs_f64();
        if secs > 0.0 {
            self.json_bytes as f64 / (1024.0 * 1024.0) / secs
        } else {
            0.0
        }
    }

    /// Add another drone's stats to these.
    pub fn merge(&mut self, other: &ConversionStats) {
        self.items_converted += other.items_converted;
        self.parse_failures += other.parse_failures;
        self.json_bytes += other.json_bytes;
        self.messages += other.messages;
        self.message_bytes += other.message_bytes;
        self.rows_emitted += other.rows_emitted;
        self.rows_dropped += other.rows_dropped;
        self.parse_time += other.parse_time;
        self.combine_time += other.combine_time;
        self.serialize_time += other.serialize_time;
        self.enqueue_time += other.enqueue_time;
        self.thread_time += other.thread_time;
    }
}

impl AddAssign<&ConversionStats> for ConversionStats {
    fn add_assign(&mut self, rhs: &ConversionStats) {
        self.merge(rhs);
    }
}

impl<'a> Sum<&'a ConversionStats> for ConversionStats {
    fn sum<I: Iterator<Item = &'a ConversionStats>>(iter: I) -> Self {
        iter.fold(ConversionStats::new(), |mut acc, s| {
            acc += s;
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_rates() {
        let mut stats = ConversionStats::new();
        stats.record_converted(1024 * 1024, Duration::from_millis(500));
        stats.record_converted(1024 * 1024, Duration::from_millis(500));
        stats.record_parse_failure(10, Duration::ZERO);
        stats.record_message(2, 300, Duration::ZERO, Duration::ZERO, Duration::ZERO);

        assert_eq!(stats.items_converted, 2);
        assert_eq!(stats.parse_failures, 1);
        assert_eq!(stats.rows_emitted, 2);
        assert!((stats.items_per_second() - 2.0).abs() < 1e-9);
        assert!(stats.parse_mib_per_second() > 1.99);
    }

    #[test]
    fn test_rates_without_time() {
        let stats = ConversionStats::new();
        assert_eq!(stats.items_per_second(), 0.0);
        assert_eq!(stats.parse_mib_per_second(), 0.0);
    }

    #[test]
    fn test_sum_merges_counts_and_durations() {
        let mut a = ConversionStats::new();
        a.record_converted(10, Duration::from_millis(1));
        a.record_message(1, 100, Duration::from_millis(2), Duration::from_millis(3), Duration::ZERO);
        a.thread_time = Duration::from_secs(1);

        let mut b = ConversionStats::new();
        b.record_converted(20, Duration::from_millis(4));
        b.record_parse_failure(5, Duration::ZERO);
        b.record_dropped(1);
        b.thread_time = Duration::from_secs(2);

        let total: ConversionStats = [a, b].iter().sum();
        assert_eq!(total.items_converted, 2);
        assert_eq!(total.parse_failures, 1);
        assert_eq!(total.json_bytes, 35);
        assert_eq!(total.messages, 1);
        assert_eq!(total.rows_dropped, 1);
        assert_eq!(total.parse_time, Duration::from_millis(5));
        assert_eq!(total.thread_time, Duration::from_secs(3));
        assert_eq!(total.busy_time(), Duration::from_millis(10));
    }
}
