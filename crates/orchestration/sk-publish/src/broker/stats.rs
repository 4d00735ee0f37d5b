//! Counting broker.

use sk_error::PublishError;
use sk_traits::BrokerClient;
use sk_types::SerializedMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counters {
    messages: AtomicU64,
    rows: AtomicU64,
    bytes: AtomicU64,
}

/// Broker that counts messages and discards them.
///
/// Used for throughput runs. Clones share counters, so a clone kept by the
/// caller can read totals after the original moved into the publish worker.
#[derive(Debug, Clone, Default)]
pub struct StatsBroker {
    counters: Arc<Counters>,
}

/// Totals seen by a [`StatsBroker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsReport {
    pub messages: u64,
    pub rows: u64,
    /// Serialized payload bytes
    pub bytes: u64,
}

impl StatsBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self) -> StatsReport {
        StatsReport {
            messages: self.counters.messages.load(Ordering::Relaxed),
            rows: self.counters.rows.load(Ordering::Relaxed),
            bytes: self.counters.bytes.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.counters.messages.store(0, Ordering::Relaxed);
        self.counters.rows.store(0, Ordering::Relaxed);
        self.counters.bytes.store(0, Ordering::Relaxed);
    }
}

impl BrokerClient for StatsBroker {
    fn name(&self) -> &str {
        "stats"
    }

    fn publish(&mut self, message: &SerializedMessage) -> Result<(), PublishError> {
        self.counters.messages.fetch_add(1, Ordering::Relaxed);
        self.counters
            .rows
            .fetch_add(message.row_count() as u64, Ordering::Relaxed);
        self.counters
            .bytes
            .fetch_add(message.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use sk_types::ColumnarBatch;

    fn message(rows: i64) -> SerializedMessage {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from((0..rows).collect::<Vec<_>>()))],
        )
        .unwrap();
        SerializedMessage::from_batch(&ColumnarBatch::new(batch, None, None), vec![1u8; 10])
    }

    #[test]
    fn test_counts_through_clone() {
        let broker = StatsBroker::new();
        let mut publisher = broker.clone();

        publisher.publish(&message(3)).unwrap();
        publisher.publish(&message(4)).unwrap();

        assert_eq!(
            broker.report(),
            StatsReport {
                messages: 2,
                rows: 7,
                bytes: 20
            }
        );

        broker.reset();
        assert_eq!(broker.report(), StatsReport::default());
    }
}
