//! Conversion worker ("drone") loop.

use sk_accumulator::BatchBuilder;
use sk_error::{QueueClosed, SerializeError};
use sk_queue::{QueueConsumer, QueueProducer};
use sk_types::{PipelineConfig, PipelineProgress, RawItem, SerializedMessage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::ConversionStats;

/// Loop settings shared by every drone of a hive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DroneSettings {
    /// Builder size at which a batch is finalized
    pub batch_threshold_bytes: usize,

    /// Longest wait on an empty input queue between cancellation checks
    pub poll_interval: Duration,

    /// Flush a partial batch once its oldest row is this old and input is idle
    pub idle_flush: Option<Duration>,
}

impl DroneSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            batch_threshold_bytes: config.batch_threshold_bytes,
            poll_interval: config.poll_interval,
            idle_flush: config.idle_flush,
        }
    }
}

/// What a drone thread hands back on join.
#[derive(Debug, Default)]
pub struct DroneOutcome {
    pub stats: ConversionStats,

    /// First serialize failure; the rows it covered were dropped
    pub error: Option<SerializeError>,
}

/// Why a drone left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DroneExit {
    /// Input queue closed and drained
    InputClosed,
    /// Cancellation token fired
    Cancelled,
    /// Output queue has no consumer left
    OutputClosed,
}

/// One conversion thread.
///
/// Owns its batch builder and stats; the only shared state it touches is the
/// two queues and the progress counters.
pub struct ConversionWorker {
    id: usize,
    input: QueueConsumer<RawItem>,
    output: QueueProducer<SerializedMessage>,
    builder: BatchBuilder,
    settings: DroneSettings,
    cancel: CancellationToken,
    progress: Arc<PipelineProgress>,
    stats: ConversionStats,
    error: Option<SerializeError>,
}

impl ConversionWorker {
    pub fn new(
        id: usize,
        input: QueueConsumer<RawItem>,
        output: QueueProducer<SerializedMessage>,
        builder: BatchBuilder,
        settings: DroneSettings,
        cancel: CancellationToken,
        progress: Arc<PipelineProgress>,
    ) -> Self {
        Self {
            id,
            input,
            output,
            builder,
            settings,
            cancel,
            progress,
            stats: ConversionStats::new(),
            error: None,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Runs until the input queue is closed and drained, the token is
    /// cancelled, or the output queue loses its consumer.
    ///
    /// Any partial batch is finalized and pushed before returning, unless the
    /// output queue is gone. Rows that fit in no message are dropped, cancel
    /// the pipeline and come back as [`DroneOutcome::error`].
    pub fn run(mut self) -> DroneOutcome {
        let started = Instant::now();
        debug!(
            drone = self.id,
            threshold_bytes = self.settings.batch_threshold_bytes,
            "Drone started"
        );

        let mut exit = loop {
            if self.cancel.is_cancelled() {
                break DroneExit::Cancelled;
            }

            match self.input.pop_timeout(self.settings.poll_interval) {
                Ok(Some(item)) => {
                    self.convert(&item);
                    if self.builder.size() >= self.settings.batch_threshold_bytes
                        && self.flush().is_err()
                    {
                        break DroneExit::OutputClosed;
                    }
                }
                Ok(None) => {
                    if self.idle_flush_due() && self.flush().is_err() {
                        break DroneExit::OutputClosed;
                    }
                }
                Err(QueueClosed) => break DroneExit::InputClosed,
            }
        };

        if exit != DroneExit::OutputClosed && !self.builder.is_empty() && self.flush().is_err() {
            exit = DroneExit::OutputClosed;
        }
        if exit == DroneExit::OutputClosed && !self.builder.is_empty() {
            let rows = self.builder.rows() as u64;
            // Discard what is left; there is nobody to hand it to.
            let _ = self.builder.take_batch();
            self.drop_rows(rows);
        }

        self.stats.thread_time = started.elapsed();
        debug!(
            drone = self.id,
            exit = ?exit,
            items = self.stats.items_converted,
            parse_failures = self.stats.parse_failures,
            messages = self.stats.messages,
            rows_dropped = self.stats.rows_dropped,
            "Drone stopped"
        );
        DroneOutcome {
            stats: self.stats,
            error: self.error,
        }
    }

    fn convert(&mut self, item: &RawItem) {
        let start = Instant::now();
        let result = self.builder.append(item);
        let elapsed = start.elapsed();
        let bytes = item.len() as u64;

        match result {
            Ok(()) => {
                self.stats.record_converted(bytes, elapsed);
                self.progress.record_converted();
            }
            Err(e) => {
                self.stats.record_parse_failure(bytes, elapsed);
                self.progress.record_parse_failure();
                debug!(drone = self.id, seq = item.seq(), error = %e, "Dropping unparseable item");
            }
        }
    }

    fn idle_flush_due(&self) -> bool {
        match (self.settings.idle_flush, self.builder.oldest_received_at()) {
            (Some(limit), Some(oldest)) => oldest.elapsed() >= limit,
            _ => false,
        }
    }

    /// Finalizes the current rows and pushes the resulting messages downstream.
    ///
    /// A batch over the message size limit, or over the row cap, goes out as
    /// several messages. Only a closed output queue is reported as an error.
    fn flush(&mut self) -> Result<(), QueueClosed> {
        let rows = self.builder.rows() as u64;

        let combine_start = Instant::now();
        let taken = match self.builder.take_rows() {
            Ok(taken) => taken,
            Err(e) => {
                self.fail(rows, e);
                return Ok(());
            }
        };
        let mut combine_time = combine_start.elapsed();

        let serialize_start = Instant::now();
        let split = self.builder.serialize_split(&taken);
        let mut serialize_time = serialize_start.elapsed();

        if let Some(e) = split.error {
            self.fail(split.rejected_rows as u64, e);
        }
        if split.messages.len() > 1 {
            debug!(drone = self.id, rows, messages = split.messages.len(), "Batch split");
        }

        let mut messages = split.messages.into_iter();
        while let Some(message) = messages.next() {
            let rows = message.row_count() as u64;
            let bytes = message.len() as u64;

            let enqueue_start = Instant::now();
            if self.output.push(message).is_err() {
                let lost = rows + messages.by_ref().map(|m| m.row_count() as u64).sum::<u64>();
                warn!(drone = self.id, rows = lost, "Output queue closed, dropping batch");
                self.drop_rows(lost);
                return Err(QueueClosed);
            }

            // Combine and serialize time are charged to the first message.
            self.stats.record_message(
                rows,
                bytes,
                std::mem::take(&mut combine_time),
                std::mem::take(&mut serialize_time),
                enqueue_start.elapsed(),
            );
            trace!(drone = self.id, rows, bytes, "Message queued");
        }
        Ok(())
    }

    /// Drops rows that cannot be serialized and shuts the pipeline down.
    fn fail(&mut self, rows: u64, e: SerializeError) {
        error!(
            drone = self.id,
            rows,
            error = %e,
            "Dropping rows that cannot be serialized, shutting down pipeline"
        );
        self.drop_rows(rows);
        self.cancel.cancel();
        self.error.get_or_insert(e);
    }

    fn drop_rows(&mut self, rows: u64) {
        self.stats.record_dropped(rows);
        self.progress.record_dropped(rows);
    }
}
