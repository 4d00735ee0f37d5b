//! Received items and sequence ranges.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One received JSON record.
///
/// The sequence number is assigned at ingestion and is strictly increasing
/// per run. The payload is kept as raw bytes; it is only parsed by the drone
/// that dequeues the item.
#[derive(Debug, Clone)]
pub struct RawItem {
    seq: u64,
    payload: Bytes,
    received_at: Instant,
}

impl RawItem {
    /// Creates an item stamped with the current instant.
    pub fn new(seq: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            payload: payload.into(),
            received_at: Instant::now(),
        }
    }

    /// Overrides the ingestion timestamp.
    pub fn with_received_at(mut self, received_at: Instant) -> Self {
        self.received_at = received_at;
        self
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    #[inline]
    pub fn received_at(&self) -> Instant {
        self.received_at
    }
}

/// Inclusive range of item sequence numbers.
///
/// A batch built by one drone holds items in the order that drone dequeued
/// them, so the range spans the lowest and highest sequence seen. With several
/// drones the range may have gaps belonging to other messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqRange {
    pub first: u64,
    pub last: u64,
}

impl SeqRange {
    /// Range holding a single sequence number.
    pub fn single(seq: u64) -> Self {
        Self {
            first: seq,
            last: seq,
        }
    }

    /// Smallest range holding every number in `seqs`, `None` when empty.
    pub fn covering(seqs: &[u64]) -> Option<Self> {
        let (first, rest) = seqs.split_first()?;
        let mut range = Self::single(*first);
        for &seq in rest {
            range.include(seq);
        }
        Some(range)
    }

    /// Widens the range to include `seq`.
    pub fn include(&mut self, seq: u64) {
        self.first = self.first.min(seq);
        self.last = self.last.max(seq);
    }

    /// Number of sequence numbers spanned.
    pub fn span(&self) -> u64 {
        self.last - self.first + 1
    }

    pub fn contains(&self, seq: u64) -> bool {
        (self.first..=self.last).contains(&seq)
    }
}

impl std::fmt::Display for SeqRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.first, self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_item_accessors() {
        let item = RawItem::new(7, &b"{\"v\":1}"[..]);
        assert_eq!(item.seq(), 7);
        assert_eq!(item.payload(), b"{\"v\":1}");
        assert_eq!(item.len(), 7);
        assert!(!item.is_empty());
    }

    #[test]
    fn test_seq_range_include() {
        let mut range = SeqRange::single(5);
        range.include(3);
        range.include(9);
        range.include(4);

        assert_eq!(range, SeqRange { first: 3, last: 9 });
        assert_eq!(range.span(), 7);
        assert!(range.contains(3));
        assert!(range.contains(9));
        assert!(!range.contains(10));
        assert_eq!(range.to_string(), "3..=9");
    }

    #[test]
    fn test_seq_range_covering() {
        assert_eq!(SeqRange::covering(&[]), None);
        assert_eq!(SeqRange::covering(&[4]), Some(SeqRange::single(4)));
        assert_eq!(
            SeqRange::covering(&[8, 2, 6]),
            Some(SeqRange { first: 2, last: 8 })
        );
    }
}
