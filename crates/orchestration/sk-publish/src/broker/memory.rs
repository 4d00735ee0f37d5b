//! In-memory broker.

use parking_lot::Mutex;
use sk_error::PublishError;
use sk_traits::BrokerClient;
use sk_types::SerializedMessage;
use std::sync::Arc;

#[derive(Debug, Default)]
struct State {
    messages: Vec<SerializedMessage>,
    closed: bool,
    /// Number of successful publishes before failures start
    fail_after: Option<usize>,
    /// Failures left to inject; `None` means unlimited
    failures_left: Option<usize>,
    failure: Option<PublishError>,
}

/// Broker that keeps every published message in memory.
///
/// Clones share the same store. Failures can be injected with
/// [`fail_after`](Self::fail_after) and [`fail_times`](Self::fail_times).
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish after the first `successes` fails with `error`.
    pub fn fail_after(self, successes: usize, error: PublishError) -> Self {
        {
            let mut state = self.state.lock();
            state.fail_after = Some(successes);
            state.failures_left = None;
            state.failure = Some(error);
        }
        self
    }

    /// The next `times` publishes fail with `error`, later ones succeed.
    pub fn fail_times(self, times: usize, error: PublishError) -> Self {
        {
            let mut state = self.state.lock();
            state.fail_after = Some(0);
            state.failures_left = Some(times);
            state.failure = Some(error);
        }
        self
    }

    pub fn messages(&self) -> Vec<SerializedMessage> {
        self.state.lock().messages.clone()
    }

    /// Rows over all stored messages.
    pub fn rows(&self) -> usize {
        self.state.lock().messages.iter().map(|m| m.row_count()).sum()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl BrokerClient for MemoryBroker {
    fn name(&self) -> &str {
        "memory"
    }

    fn publish(&mut self, message: &SerializedMessage) -> Result<(), PublishError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PublishError::Closed);
        }

        let failing = matches!(state.fail_after, Some(n) if state.messages.len() >= n)
            && state.failures_left != Some(0);
        if failing {
            if let Some(left) = state.failures_left.as_mut() {
                *left -= 1;
            }
            if let Some(error) = state.failure.clone() {
                return Err(error);
            }
        }

        state.messages.push(message.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), PublishError> {
        self.state.lock().closed = true;
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

    fn message() -> SerializedMessage {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![7]))]).unwrap();
        SerializedMessage::from_batch(&ColumnarBatch::new(batch, None, None), vec![0u8; 4])
    }

    #[test]
    fn test_stores_and_closes() {
        let broker = MemoryBroker::new();
        let mut client = broker.clone();
        client.publish(&message()).unwrap();
        client.close().unwrap();

        assert_eq!(broker.messages().len(), 1);
        assert_eq!(broker.rows(), 1);
        assert!(broker.is_closed());
        assert_eq!(client.publish(&message()), Err(PublishError::Closed));
    }

    #[test]
    fn test_fail_after() {
        let mut broker = MemoryBroker::new().fail_after(2, PublishError::Rejected("x".into()));
        assert!(broker.publish(&message()).is_ok());
        assert!(broker.publish(&message()).is_ok());
        assert!(broker.publish(&message()).is_err());
        assert!(broker.publish(&message()).is_err());
        assert_eq!(broker.messages().len(), 2);
    }

    #[test]
    fn test_fail_times() {
        let mut broker = MemoryBroker::new().fail_times(2, PublishError::Timeout("x".into()));
        assert!(broker.publish(&message()).is_err());
        assert!(broker.publish(&message()).is_err());
        assert!(broker.publish(&message()).is_ok());
        assert!(broker.publish(&message()).is_ok());
    }
}
