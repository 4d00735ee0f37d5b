//! Receiver trait and the ingest handle receivers push through.

use bytes::Bytes;
use sk_error::{QueueClosed, ReceiverError};
use sk_queue::QueueProducer;
use sk_types::{PipelineProgress, RawItem};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Source of raw JSON records.
///
/// A receiver runs on its own thread. It calls [`IngestHandle::push`] once
/// per record until its source ends, the token is cancelled, or it fails.
/// Receivers must check `cancel` at least once per blocking read timeout.
///
/// # Implementations
///
/// - TCP receiver: newline-delimited JSON from a socket
/// - Line receiver: newline-delimited JSON from any reader (stdin, files)
pub trait Receiver: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Runs until end-of-stream, cancellation or failure.
    ///
    /// # Returns
    ///
    /// - `Ok(outcome)` - the source stopped in an orderly way
    /// - `Err(error)` - the source failed; items pushed so far are still drained
    fn receive_loop(
        &mut self,
        ingest: &mut IngestHandle,
        cancel: &CancellationToken,
    ) -> Result<ReceiveOutcome, ReceiverError>;
}

/// Why a receiver stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Source closed (connection closed, EOF)
    EndOfStream,
    /// Cancellation token fired
    Cancelled,
    /// Input queue has no consumers left
    DownstreamClosed,
}

impl std::fmt::Display for ReceiveOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndOfStream => write!(f, "end of stream"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::DownstreamClosed => write!(f, "downstream closed"),
        }
    }
}

/// Entry point for received items.
///
/// Assigns sequence numbers, stamps the ingestion time, counts received
/// items and bytes, and pushes onto the input queue. Dropping the handle
/// closes the input queue for the drones.
pub struct IngestHandle {
    producer: QueueProducer<RawItem>,
    progress: Arc<PipelineProgress>,
    next_seq: u64,
}

impl IngestHandle {
    pub fn new(producer: QueueProducer<RawItem>, progress: Arc<PipelineProgress>) -> Self {
        Self {
            producer,
            progress,
            next_seq: 0,
        }
    }

    /// Enqueue one JSON payload, blocking while the input queue is full.
    ///
    /// Returns the sequence number assigned to the item.
    pub fn push(&mut self, payload: impl Into<Bytes>) -> Result<u64, QueueClosed> {
        let seq = self.next_seq;
        let item = RawItem::new(seq, payload);
        let bytes = item.len() as u64;

        self.producer.push(item)?;
        self.next_seq += 1;
        self.progress.record_received(bytes);

        trace!(seq, bytes, "Item received");
        Ok(seq)
    }

    /// Number of items pushed so far. Never decreases.
    #[inline]
    pub fn pushed(&self) -> u64 {
        self.next_seq
    }
}
