//! Columnar batches and the wire messages built from them.

use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use std::time::Instant;

use crate::SeqRange;

/// A finalized columnar batch, ready for serialization.
///
/// Every row was produced by parsing exactly one [`RawItem`](crate::RawItem).
/// `seq_range` is `None` only for the zero-row batch.
#[derive(Debug, Clone)]
pub struct ColumnarBatch {
    inner: RecordBatch,
    seq_range: Option<SeqRange>,
    oldest_received_at: Option<Instant>,
}

impl ColumnarBatch {
    pub fn new(
        batch: RecordBatch,
        seq_range: Option<SeqRange>,
        oldest_received_at: Option<Instant>,
    ) -> Self {
        Self {
            inner: batch,
            seq_range,
            oldest_received_at,
        }
    }

    /// Returns a reference to the underlying RecordBatch.
    #[inline]
    pub fn record_batch(&self) -> &RecordBatch {
        &self.inner
    }

    #[inline]
    pub fn num_rows(&self) -> usize {
        self.inner.num_rows()
    }

    #[inline]
    pub fn seq_range(&self) -> Option<SeqRange> {
        self.seq_range
    }

    #[inline]
    pub fn oldest_received_at(&self) -> Option<Instant> {
        self.oldest_received_at
    }

    /// Approximate in-memory size (Arrow array memory size).
    #[inline]
    pub fn memory_size(&self) -> usize {
        self.inner.get_array_memory_size()
    }
}

/// One serialized batch in wire format.
///
/// Immutable once built: the payload is a shared [`Bytes`] buffer and every
/// field is read-only. Ownership moves from the drone into the output queue
/// and from there to the publish worker.
#[derive(Debug, Clone)]
pub struct SerializedMessage {
    payload: Bytes,
    row_count: usize,
    seq_range: Option<SeqRange>,
    oldest_received_at: Option<Instant>,
    serialized_at: Instant,
}

impl SerializedMessage {
    /// Wraps an encoded `batch`, carrying its row count and sequence tracking.
    pub fn from_batch(batch: &ColumnarBatch, payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            row_count: batch.num_rows(),
            seq_range: batch.seq_range(),
            oldest_received_at: batch.oldest_received_at(),
            serialized_at: Instant::now(),
        }
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Encoded size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    #[inline]
    pub fn seq_range(&self) -> Option<SeqRange> {
        self.seq_range
    }

    /// Ingestion instant of the oldest row in the message.
    #[inline]
    pub fn oldest_received_at(&self) -> Option<Instant> {
        self.oldest_received_at
    }

    #[inline]
    pub fn serialized_at(&self) -> Instant {
        self.serialized_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn two_rows() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![1, 2]))]).unwrap()
    }

    #[test]
    fn test_message_carries_batch_metadata() {
        let received = Instant::now();
        let batch = ColumnarBatch::new(
            two_rows(),
            Some(SeqRange { first: 10, last: 11 }),
            Some(received),
        );
        assert!(batch.memory_size() > 0);

        let message = SerializedMessage::from_batch(&batch, vec![1u8, 2, 3]);
        assert_eq!(message.row_count(), 2);
        assert_eq!(message.len(), 3);
        assert_eq!(message.seq_range(), Some(SeqRange { first: 10, last: 11 }));
        assert_eq!(message.oldest_received_at(), Some(received));
        assert!(message.serialized_at() >= received);
    }

    #[test]
    fn test_message_clone_shares_payload() {
        let batch = ColumnarBatch::new(two_rows(), None, None);
        let message = SerializedMessage::from_batch(&batch, vec![0u8; 64]);
        let copy = message.clone();
        assert_eq!(message.payload().as_ptr(), copy.payload().as_ptr());
    }
}
