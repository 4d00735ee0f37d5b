//! Publish worker loop.

use anyhow::Context;
use sk_error::{classify_publish_error, ErrorCategory, PublishError, SkeinError};
use sk_queue::QueueConsumer;
use sk_traits::BrokerClient;
use sk_types::{PipelineProgress, RetryPolicy, SerializedMessage};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{LatencySample, PublishStats};

/// What the publish thread hands back on join.
#[derive(Debug, Default)]
pub struct PublishOutcome {
    pub stats: PublishStats,

    /// One sample per published message, when latency tracking is on
    pub latencies: Vec<LatencySample>,

    /// Rows discarded after a fatal publish error
    pub rows_discarded: u64,

    /// The error that stopped publishing, if any
    pub error: Option<PublishError>,
}

/// The single consumer of the output queue.
///
/// Publishes every message it pops, retrying transient failures per the
/// [`RetryPolicy`]. A failure it cannot retry cancels the pipeline; the
/// worker then keeps draining the queue without publishing so that drones
/// never block on it, and counts the discarded rows.
pub struct PublishWorker {
    broker: Box<dyn BrokerClient>,
    input: QueueConsumer<SerializedMessage>,
    cancel: CancellationToken,
    progress: Arc<PipelineProgress>,
    retry: RetryPolicy,
    track_latency: bool,
}

impl PublishWorker {
    pub fn new(
        broker: Box<dyn BrokerClient>,
        input: QueueConsumer<SerializedMessage>,
        cancel: CancellationToken,
        progress: Arc<PipelineProgress>,
    ) -> Self {
        Self {
            broker,
            input,
            cancel,
            progress,
            retry: RetryPolicy::default(),
            track_latency: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_latency_tracking(mut self, enabled: bool) -> Self {
        self.track_latency = enabled;
        self
    }

    /// Runs the worker on a thread named `skein-publisher`.
    pub fn spawn(self) -> Result<JoinHandle<PublishOutcome>, SkeinError> {
        let handle = thread::Builder::new()
            .name("skein-publisher".to_string())
            .spawn(move || self.run())
            .context("Failed to spawn publish worker")?;
        Ok(handle)
    }

    /// Runs until the output queue is closed and drained.
    pub fn run(mut self) -> PublishOutcome {
        let started = Instant::now();
        let mut outcome = PublishOutcome::default();
        info!(broker = self.broker.name(), "Publish worker started");

        while let Ok(message) = self.input.pop() {
            if outcome.error.is_some() {
                outcome.rows_discarded += message.row_count() as u64;
                self.progress.record_dropped(message.row_count() as u64);
                continue;
            }

            if let Err(e) = self.publish(&message, &mut outcome) {
                error!(
                    broker = self.broker.name(),
                    rows = message.row_count(),
                    seq = ?message.seq_range(),
                    error = %e,
                    "Publish failed, shutting down pipeline"
                );
                self.cancel.cancel();
                outcome.rows_discarded += message.row_count() as u64;
                self.progress.record_dropped(message.row_count() as u64);
                outcome.error = Some(e);
            }
        }

        if let Err(e) = self.broker.close() {
            warn!(broker = self.broker.name(), error = %e, "Broker close failed");
            outcome.error.get_or_insert(e);
        }

        outcome.stats.thread_time = started.elapsed();
        if outcome.rows_discarded > 0 {
            warn!(rows = outcome.rows_discarded, "Rows discarded after publish failure");
        }
        debug!(
            messages = outcome.stats.messages_published,
            rows = outcome.stats.rows_published,
            retries = outcome.stats.retries,
            "Publish worker stopped"
        );
        outcome
    }

    fn publish(
        &mut self,
        message: &SerializedMessage,
        outcome: &mut PublishOutcome,
    ) -> Result<(), PublishError> {
        let mut attempt = 0u32;
        loop {
            let start = Instant::now();
            match self.broker.publish(message) {
                Ok(()) => {
                    let published = Instant::now();
                    let rows = message.row_count() as u64;
                    outcome.stats.record_published(
                        rows,
                        message.len() as u64,
                        published.duration_since(start),
                    );
                    self.progress.record_published(rows);

                    if self.track_latency {
                        if let Some(received) = message.oldest_received_at() {
                            outcome.latencies.push(LatencySample {
                                seq_range: message.seq_range(),
                                rows: message.row_count(),
                                received,
                                serialized: message.serialized_at(),
                                published,
                            });
                        }
                    }
                    return Ok(());
                }
                Err(e) => {
                    outcome.stats.record_failure(start.elapsed());
                    attempt += 1;

                    let retryable = classify_publish_error(&e) == ErrorCategory::Transient;
                    if !retryable || attempt > self.retry.max_retries || self.cancel.is_cancelled() {
                        return Err(e);
                    }

                    let backoff = self.retry.backoff_for(attempt);
                    warn!(
                        attempt,
                        max_retries = self.retry.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    outcome.stats.record_retry();
                    thread::sleep(backoff);
                }
            }
        }
    }
}
