//! Batch builder turning parsed JSON records into wire messages.
//!
//! A [`BatchBuilder`] parses one [`RawItem`] at a time into a single-row
//! Arrow batch and keeps it. Once the accumulated footprint reaches the
//! caller's threshold, [`BatchBuilder::finish`] concatenates the rows into one
//! batch, serializes it and resets the builder. Batching many small records
//! into one message amortizes serialization and publish overhead.
//!
//! [`BatchBuilder::finish_split`] is the drone's path: it cuts the rows into
//! several messages when a row cap is set or when one message would exceed
//! the serializer's size limit.
//!
//! # Example
//!
//! ```
//! use sk_accumulator::BatchBuilder;
//! use sk_arrow::{ArrowJsonParser, IpcSerializer};
//! use sk_types::{RawItem, SchemaSpec};
//! use std::sync::Arc;
//!
//! let schema = SchemaSpec::parse_inline("seq:int64,v:int64").unwrap();
//! let mut builder = BatchBuilder::new(
//!     Arc::new(ArrowJsonParser::from_spec(&schema)),
//!     Arc::new(IpcSerializer::new()),
//! );
//!
//! builder.append(&RawItem::new(0, &br#"{"seq":0,"v":1}"#[..])).unwrap();
//! assert!(builder.size() > 0);
//!
//! let message = builder.finish().unwrap();
//! assert_eq!(message.row_count(), 1);
//! assert!(builder.is_empty());
//! ```

use arrow::array::{ArrayRef, UInt64Array};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use sk_error::{ParseError, SerializeError};
use sk_traits::{Parser, Serializer};
use sk_types::{ColumnarBatch, RawItem, SeqRange, SerializedMessage, SEQ_COLUMN_NAME};
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Memory accounted per row for the sequence column.
const SEQ_COLUMN_ROW_BYTES: usize = std::mem::size_of::<u64>();

/// Accumulates parsed rows until finalized into one [`SerializedMessage`].
///
/// Owned by exactly one drone; nothing in here is shared.
pub struct BatchBuilder {
    parser: Arc<dyn Parser>,
    serializer: Arc<dyn Serializer>,

    /// Schema of finished batches (parser schema, plus the sequence column).
    schema: SchemaRef,

    seq_column: bool,

    /// One single-row batch per appended item.
    rows: Vec<RecordBatch>,

    /// Sequence number of each row, same order as `rows`.
    seqs: Vec<u64>,

    /// Ingestion instant of each row, same order as `rows`.
    received: Vec<Instant>,

    /// Row cap per message in [`serialize_split`](Self::serialize_split).
    max_rows: Option<usize>,

    /// Accumulated Arrow memory size in bytes.
    current_size: usize,

    seq_range: Option<SeqRange>,

    oldest_received_at: Option<Instant>,
}

impl BatchBuilder {
    pub fn new(parser: Arc<dyn Parser>, serializer: Arc<dyn Serializer>) -> Self {
        let schema = parser.schema();
        Self {
            parser,
            serializer,
            schema,
            seq_column: false,
            rows: Vec::new(),
            seqs: Vec::new(),
            received: Vec::new(),
            max_rows: None,
            current_size: 0,
            seq_range: None,
            oldest_received_at: None,
        }
    }

    /// Prepend an `ingest_seq` UInt64 column holding each row's sequence number.
    pub fn with_seq_column(mut self, enabled: bool) -> Self {
        self.seq_column = enabled;
        self.schema = if enabled {
            let parsed = self.parser.schema();
            let mut fields = vec![Arc::new(Field::new(SEQ_COLUMN_NAME, DataType::UInt64, false))];
            fields.extend(parsed.fields().iter().cloned());
            Arc::new(Schema::new(fields))
        } else {
            self.parser.schema()
        };
        self
    }

    /// Cut finished rows into messages of at most `max_rows` rows.
    pub fn with_max_rows(mut self, max_rows: Option<usize>) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Parses `item` and appends its row.
    ///
    /// On error nothing accumulated so far is touched and the item is dropped.
    pub fn append(&mut self, item: &RawItem) -> Result<(), ParseError> {
        let row = self.parser.parse(item.payload())?;

        let mut row_size = row.get_array_memory_size();
        if self.seq_column {
            row_size += SEQ_COLUMN_ROW_BYTES;
        }

        match self.seq_range.as_mut() {
            Some(range) => range.include(item.seq()),
            None => self.seq_range = Some(SeqRange::single(item.seq())),
        }
        let received = item.received_at();
        self.oldest_received_at = Some(match self.oldest_received_at {
            Some(oldest) => oldest.min(received),
            None => received,
        });

        self.rows.push(row);
        self.seqs.push(item.seq());
        self.received.push(received);
        self.current_size += row_size;

        trace!(
            seq = item.seq(),
            row_size_bytes = row_size,
            current_size_bytes = self.current_size,
            current_rows = self.rows.len(),
            "Row accumulated"
        );
        Ok(())
    }

    /// Accumulated in-memory footprint in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.current_size
    }

    /// Number of accumulated rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Schema of the batches this builder produces.
    #[inline]
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    #[inline]
    pub fn seq_range(&self) -> Option<SeqRange> {
        self.seq_range
    }

    /// Ingestion instant of the oldest accumulated row.
    #[inline]
    pub fn oldest_received_at(&self) -> Option<Instant> {
        self.oldest_received_at
    }

    /// Collapses every accumulated row into one batch and resets the builder.
    ///
    /// The builder is empty afterwards even if concatenation fails. An empty
    /// builder yields a zero-row batch.
    pub fn take_batch(&mut self) -> Result<ColumnarBatch, SerializeError> {
        let rows = self.take_rows()?;
        Ok(rows.chunk(0, rows.num_rows()))
    }

    /// Like [`take_batch`](Self::take_batch), but keeps per-row metadata so
    /// the rows can be cut into several messages.
    pub fn take_rows(&mut self) -> Result<TakenRows, SerializeError> {
        let rows = std::mem::take(&mut self.rows);
        let seqs = std::mem::take(&mut self.seqs);
        let received = std::mem::take(&mut self.received);
        self.seq_range = None;
        self.oldest_received_at = None;
        self.current_size = 0;

        if rows.is_empty() {
            return Ok(TakenRows {
                batch: RecordBatch::new_empty(self.schema.clone()),
                seqs,
                received,
            });
        }

        let combined = concat_batches(&self.parser.schema(), &rows)
            .map_err(|e| SerializeError::Combine(e.to_string()))?;

        let combined = if self.seq_column {
            let mut columns: Vec<ArrayRef> = Vec::with_capacity(combined.num_columns() + 1);
            columns.push(Arc::new(UInt64Array::from(seqs.clone())));
            columns.extend(combined.columns().iter().cloned());
            RecordBatch::try_new(self.schema.clone(), columns)
                .map_err(|e| SerializeError::Combine(e.to_string()))?
        } else {
            combined
        };

        trace!(
            rows = combined.num_rows(),
            batch_size_bytes = combined.get_array_memory_size(),
            "Combined rows into one batch"
        );
        Ok(TakenRows {
            batch: combined,
            seqs,
            received,
        })
    }

    /// Serializes a batch taken from this builder.
    pub fn serialize(&self, batch: &ColumnarBatch) -> Result<SerializedMessage, SerializeError> {
        let payload = self.serializer.serialize(batch)?;
        Ok(SerializedMessage::from_batch(batch, payload))
    }

    /// Serializes taken rows into as many messages as the limits require.
    ///
    /// Rows are cut into chunks of at most `max_rows` first. A chunk whose
    /// encoding is over the serializer's size limit is halved until every
    /// part fits. A single row that still does not fit is rejected, and so is
    /// every row of a chunk that fails to encode; all other rows still come
    /// back as messages, in row order.
    pub fn serialize_split(&self, rows: &TakenRows) -> SplitMessages {
        let mut split = SplitMessages::default();
        let chunk_rows = self.max_rows.unwrap_or(usize::MAX).max(1);
        let total = rows.num_rows();

        let mut offset = 0;
        while offset < total {
            let len = chunk_rows.min(total - offset);
            self.serialize_fitting(rows, offset, len, &mut split);
            offset += len;
        }
        split
    }

    fn serialize_fitting(
        &self,
        rows: &TakenRows,
        offset: usize,
        len: usize,
        split: &mut SplitMessages,
    ) {
        match self.serialize(&rows.chunk(offset, len)) {
            Ok(message) => split.messages.push(message),
            Err(SerializeError::MessageTooLarge { size, max }) if len > 1 => {
                trace!(rows = len, size, max, "Halving oversized chunk");
                let half = len / 2;
                self.serialize_fitting(rows, offset, half, split);
                self.serialize_fitting(rows, offset + half, len - half, split);
            }
            Err(e) => {
                split.rejected_rows += len;
                split.error.get_or_insert(e);
            }
        }
    }

    /// [`take_batch`](Self::take_batch) followed by [`serialize`](Self::serialize).
    ///
    /// Always one message, whatever the row cap.
    pub fn finish(&mut self) -> Result<SerializedMessage, SerializeError> {
        let batch = self.take_batch()?;
        self.serialize(&batch)
    }

    /// [`take_rows`](Self::take_rows) followed by
    /// [`serialize_split`](Self::serialize_split).
    pub fn finish_split(&mut self) -> Result<SplitMessages, SerializeError> {
        let rows = self.take_rows()?;
        Ok(self.serialize_split(&rows))
    }
}

/// Rows taken out of a [`BatchBuilder`], combined into one batch.
///
/// Keeps every row's sequence number and receive instant, so any contiguous
/// slice becomes a [`ColumnarBatch`] with metadata of its own.
#[derive(Debug, Clone)]
pub struct TakenRows {
    batch: RecordBatch,
    seqs: Vec<u64>,
    received: Vec<Instant>,
}

impl TakenRows {
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Rows `offset..offset + len` as a batch of their own.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn chunk(&self, offset: usize, len: usize) -> ColumnarBatch {
        let end = offset + len;
        ColumnarBatch::new(
            self.batch.slice(offset, len),
            SeqRange::covering(&self.seqs[offset..end]),
            self.received[offset..end].iter().min().copied(),
        )
    }
}

/// Messages produced by [`BatchBuilder::serialize_split`].
#[derive(Debug, Default)]
pub struct SplitMessages {
    pub messages: Vec<SerializedMessage>,

    /// Rows left out of `messages`
    pub rejected_rows: usize,

    /// First error that rejected rows
    pub error: Option<SerializeError>,
}

impl SplitMessages {
    /// Rows carried by `messages`.
    pub fn rows(&self) -> usize {
        self.messages.iter().map(SerializedMessage::row_count).sum()
    }
}

impl std::fmt::Debug for BatchBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchBuilder")
            .field("rows", &self.rows.len())
            .field("current_size", &self.current_size)
            .field("seq_range", &self.seq_range)
            .field("seq_column", &self.seq_column)
            .field("max_rows", &self.max_rows)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int64Array};
    use sk_arrow::{decode_message, ArrowJsonParser, IpcSerializer};
    use sk_types::SchemaSpec;

    fn create_builder() -> BatchBuilder {
        let schema = SchemaSpec::parse_inline("seq:int64,v:int64").unwrap();
        BatchBuilder::new(
            Arc::new(ArrowJsonParser::from_spec(&schema)),
            Arc::new(IpcSerializer::new()),
        )
    }

    fn item(seq: u64) -> RawItem {
        RawItem::new(seq, format!(r#"{{"seq":{seq},"v":{}}}"#, seq + 1))
    }

    fn values(message: &SerializedMessage, column: usize) -> Vec<i64> {
        let batch = decode_message(message.payload()).unwrap();
        batch
            .column(column)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    #[test]
    fn test_append_and_finish() {
        let mut builder = create_builder();
        for seq in 0..5 {
            builder.append(&item(seq)).unwrap();
        }
        assert_eq!(builder.rows(), 5);
        assert_eq!(builder.seq_range(), Some(SeqRange { first: 0, last: 4 }));

        let message = builder.finish().unwrap();
        assert_eq!(message.row_count(), 5);
        assert_eq!(message.seq_range(), Some(SeqRange { first: 0, last: 4 }));
        assert_eq!(values(&message, 1), vec![1, 2, 3, 4, 5]);

        assert!(builder.is_empty());
        assert_eq!(builder.size(), 0);
        assert_eq!(builder.seq_range(), None);
    }

    #[test]
    fn test_size_grows_per_row() {
        let mut builder = create_builder();
        assert_eq!(builder.size(), 0);

        builder.append(&item(0)).unwrap();
        let one = builder.size();
        assert!(one > 0);

        builder.append(&item(1)).unwrap();
        assert_eq!(builder.size(), 2 * one);
    }

    #[test]
    fn test_finish_on_empty_builder_twice() {
        let mut builder = create_builder();

        let first = builder.finish().unwrap();
        let second = builder.finish().unwrap();

        for message in [&first, &second] {
            assert_eq!(message.row_count(), 0);
            assert_eq!(message.seq_range(), None);
            assert_eq!(decode_message(message.payload()).unwrap().num_rows(), 0);
        }
    }

    #[test]
    fn test_append_after_finish_starts_fresh() {
        let mut builder = create_builder();
        builder.append(&item(0)).unwrap();
        builder.append(&item(1)).unwrap();
        builder.finish().unwrap();

        builder.append(&item(2)).unwrap();
        let message = builder.finish().unwrap();

        assert_eq!(message.row_count(), 1);
        assert_eq!(message.seq_range(), Some(SeqRange::single(2)));
        assert_eq!(values(&message, 0), vec![2]);
    }

    #[test]
    fn test_failed_append_keeps_accumulated_rows() {
        let mut builder = create_builder();
        builder.append(&item(0)).unwrap();
        let size = builder.size();

        let bad = RawItem::new(1, &br#"{"seq":1,"v":"#[..]);
        assert!(builder.append(&bad).is_err());
        assert_eq!(builder.rows(), 1);
        assert_eq!(builder.size(), size);
        assert_eq!(builder.seq_range(), Some(SeqRange::single(0)));

        builder.append(&item(2)).unwrap();
        let message = builder.finish().unwrap();
        assert_eq!(message.row_count(), 2);
        assert_eq!(values(&message, 0), vec![0, 2]);
    }

    #[test]
    fn test_threshold_overshoot_is_at_most_one_row() {
        let row_size = {
            let mut sample = create_builder();
            sample.append(&item(0)).unwrap();
            sample.size()
        };

        for threshold in [1, row_size, row_size + 1, 3 * row_size - 1, 10 * row_size] {
            let mut builder = create_builder();
            for seq in 0..50 {
                let before = builder.size();
                builder.append(&item(seq)).unwrap();
                if builder.size() >= threshold {
                    assert!(before < threshold, "flush was due before row {seq}");
                    assert!(builder.size() - before <= row_size);
                    builder.finish().unwrap();
                }
            }
        }
    }

    #[test]
    fn test_seq_column() {
        let mut builder = create_builder().with_seq_column(true);
        assert_eq!(builder.schema().field(0).name(), SEQ_COLUMN_NAME);
        assert_eq!(builder.schema().fields().len(), 3);

        builder.append(&item(7)).unwrap();
        builder.append(&item(9)).unwrap();
        let message = builder.finish().unwrap();

        let batch = decode_message(message.payload()).unwrap();
        let seqs = batch
            .column(0)
            .as_any()
            .downcast_ref::<UInt64Array>()
            .unwrap();
        assert_eq!(seqs.values().to_vec(), vec![7, 9]);
        assert_eq!(batch.column(2).len(), 2);
    }

    #[test]
    fn test_oversized_message_resets_builder() {
        let schema = SchemaSpec::parse_inline("seq:int64,v:int64").unwrap();
        let mut builder = BatchBuilder::new(
            Arc::new(ArrowJsonParser::from_spec(&schema)),
            Arc::new(IpcSerializer::new().with_max_message_bytes(16)),
        );
        builder.append(&item(0)).unwrap();

        let err = builder.finish().unwrap_err();
        assert!(matches!(err, SerializeError::MessageTooLarge { .. }));
        assert!(builder.is_empty());
    }

    fn limited_builder(max_message_bytes: usize) -> BatchBuilder {
        let schema = SchemaSpec::parse_inline("seq:int64,v:int64").unwrap();
        BatchBuilder::new(
            Arc::new(ArrowJsonParser::from_spec(&schema)),
            Arc::new(IpcSerializer::new().with_max_message_bytes(max_message_bytes)),
        )
    }

    fn encoded_size(rows: u64) -> usize {
        let mut builder = create_builder();
        for seq in 0..rows {
            builder.append(&item(seq)).unwrap();
        }
        builder.finish().unwrap().len()
    }

    #[test]
    fn test_split_by_max_rows() {
        let mut builder = create_builder().with_max_rows(Some(2));
        for seq in 10..15 {
            builder.append(&item(seq)).unwrap();
        }

        let split = builder.finish_split().unwrap();
        assert!(split.error.is_none());
        assert_eq!(split.rejected_rows, 0);

        let rows: Vec<usize> = split.messages.iter().map(|m| m.row_count()).collect();
        assert_eq!(rows, vec![2, 2, 1]);
        let ranges: Vec<_> = split.messages.iter().map(|m| m.seq_range()).collect();
        assert_eq!(
            ranges,
            vec![
                Some(SeqRange { first: 10, last: 11 }),
                Some(SeqRange { first: 12, last: 13 }),
                Some(SeqRange::single(14)),
            ]
        );
        assert_eq!(values(&split.messages[1], 0), vec![12, 13]);
        assert!(builder.is_empty());
    }

    #[test]
    fn test_chunk_ranges_follow_row_seqs() {
        // A drone sees interleaved sequence numbers when others run alongside.
        let mut builder = create_builder().with_max_rows(Some(2));
        for seq in [3, 9, 4, 20] {
            builder.append(&item(seq)).unwrap();
        }

        let split = builder.finish_split().unwrap();
        assert_eq!(split.messages[0].seq_range(), Some(SeqRange { first: 3, last: 9 }));
        assert_eq!(split.messages[1].seq_range(), Some(SeqRange { first: 4, last: 20 }));
    }

    #[test]
    fn test_oversized_batch_is_halved_until_it_fits() {
        let limit = encoded_size(8);
        let mut builder = limited_builder(limit);
        for seq in 0..20 {
            builder.append(&item(seq)).unwrap();
        }

        let split = builder.finish_split().unwrap();
        assert!(split.error.is_none());
        assert_eq!(split.rejected_rows, 0);
        assert_eq!(split.rows(), 20);
        assert!(split.messages.len() > 1);

        let mut seqs = Vec::new();
        for message in &split.messages {
            assert!(message.len() <= limit);
            seqs.extend(values(message, 0));
        }
        assert_eq!(seqs, (0..20).collect::<Vec<i64>>());
    }

    #[test]
    fn test_row_too_large_for_any_message_is_rejected() {
        let mut builder = limited_builder(16);
        builder.append(&item(0)).unwrap();
        builder.append(&item(1)).unwrap();

        let split = builder.finish_split().unwrap();
        assert!(split.messages.is_empty());
        assert_eq!(split.rejected_rows, 2);
        assert!(matches!(split.error, Some(SerializeError::MessageTooLarge { .. })));
        assert!(builder.is_empty());
    }

    #[test]
    fn test_finish_split_on_empty_builder() {
        let mut builder = create_builder();
        let split = builder.finish_split().unwrap();
        assert!(split.messages.is_empty());
        assert_eq!(split.rejected_rows, 0);
    }

    #[test]
    fn test_oldest_received_at_tracks_minimum() {
        let mut builder = create_builder();
        let early = Instant::now();
        builder
            .append(&item(1).with_received_at(early + std::time::Duration::from_millis(5)))
            .unwrap();
        builder.append(&item(0).with_received_at(early)).unwrap();
        assert_eq!(builder.oldest_received_at(), Some(early));

        let batch = builder.take_batch().unwrap();
        assert_eq!(batch.oldest_received_at(), Some(early));
        assert_eq!(builder.oldest_received_at(), None);
    }
}
