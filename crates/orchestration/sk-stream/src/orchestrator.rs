//! Stream orchestrator.

use anyhow::Context;
use chrono::Utc;
use sk_arrow::{ArrowJsonParser, IpcSerializer};
use sk_convert::ConversionHive;
use sk_error::{
    ErrorKind, PipelineFailure, ReceiverError, SkeinError, ThreadFailure, ThreadRole,
};
use sk_publish::{create_broker, PublishOutcome, PublishWorker};
use sk_queue::QueueProducer;
use sk_traits::{BrokerClient, IngestHandle, Parser, ReceiveOutcome, Receiver, Serializer};
use sk_types::{PipelineConfig, PipelineProgress, RawItem};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::receiver::create_receiver;
use crate::report::write_latency_csv;
use crate::{AggregateStats, PipelineState, StateHandle};

const DRAIN_POLL: Duration = Duration::from_millis(20);
const DRAIN_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Runs one pipeline: a receiver thread, a conversion hive and a publish
/// worker, joined by two bounded queues.
///
/// Single use: [`run`](Self::run) consumes the orchestrator. Handles for
/// cancellation, progress and state can be taken before the run starts.
pub struct StreamOrchestrator {
    config: PipelineConfig,
    parser: Arc<dyn Parser>,
    serializer: Arc<dyn Serializer>,
    cancel: CancellationToken,
    progress: Arc<PipelineProgress>,
    state: StateHandle,
}

impl StreamOrchestrator {
    pub fn new(
        config: PipelineConfig,
        parser: Arc<dyn Parser>,
        serializer: Arc<dyn Serializer>,
    ) -> Result<Self, SkeinError> {
        config.validate().map_err(SkeinError::Config)?;
        Ok(Self {
            config,
            parser,
            serializer,
            cancel: CancellationToken::new(),
            progress: Arc::new(PipelineProgress::new()),
            state: StateHandle::new(),
        })
    }

    /// Orchestrator with the Arrow JSON parser and IPC serializer the
    /// configuration describes.
    pub fn from_config(config: PipelineConfig) -> Result<Self, SkeinError> {
        let parser = ArrowJsonParser::from_spec(&config.schema).with_strict_mode(config.strict_schema);
        let serializer = IpcSerializer::new().with_max_message_bytes(config.max_message_bytes);
        Self::new(config, Arc::new(parser), Arc::new(serializer))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token that stops the run when cancelled.
    ///
    /// The receiver stops reading and drones stop taking new items; what
    /// they already hold is still flushed and published.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Live counters of the run.
    pub fn progress(&self) -> Arc<PipelineProgress> {
        Arc::clone(&self.progress)
    }

    pub fn state(&self) -> StateHandle {
        self.state.clone()
    }

    /// Runs the pipeline to completion.
    ///
    /// # Returns
    ///
    /// - `Ok(stats)` - every thread finished cleanly and every received item
    ///   was published, failed to parse, or was dropped
    /// - `Err(SkeinError::Pipeline(_))` - one entry per failed thread, plus a
    ///   `DrainIncomplete` entry when items went missing without one
    pub fn run(
        self,
        receiver: Box<dyn Receiver>,
        broker: Box<dyn BrokerClient>,
    ) -> Result<AggregateStats, SkeinError> {
        let started = Instant::now();
        let started_at = Utc::now();
        let config = &self.config;

        info!(
            receiver = receiver.name(),
            broker = broker.name(),
            drones = config.drone_count,
            threshold_bytes = config.batch_threshold_bytes,
            "Starting pipeline"
        );

        let (input_tx, input_rx) = sk_queue::bounded(config.input_queue_capacity);
        let (output_tx, output_rx) = sk_queue::bounded(config.output_queue_capacity);

        let publisher = PublishWorker::new(
            broker,
            output_rx,
            self.cancel.clone(),
            Arc::clone(&self.progress),
        )
        .with_retry(config.publish_retry.clone())
        .with_latency_tracking(config.latency_enabled())
        .spawn()?;

        let hive = match ConversionHive::start(
            config,
            Arc::clone(&self.parser),
            Arc::clone(&self.serializer),
            input_rx,
            output_tx,
            self.cancel.clone(),
            Arc::clone(&self.progress),
        ) {
            Ok(hive) => hive,
            Err(e) => return Err(self.abort_start(input_tx, publisher, e)),
        };

        let mut failures = Vec::new();

        // Running: the receiver owns the only input producer.
        let ingest = IngestHandle::new(input_tx, Arc::clone(&self.progress));
        let receiver_cancel = self.cancel.clone();
        let receiver_thread = thread::Builder::new()
            .name("skein-receiver".to_string())
            .spawn(move || run_receiver(receiver, ingest, receiver_cancel))
            .context("Failed to spawn receiver thread");
        self.state.advance(PipelineState::Running);

        match receiver_thread {
            Ok(handle) => match handle.join() {
                Ok(Ok(outcome)) => info!(%outcome, "Receiver stopped"),
                Ok(Err(e)) => {
                    error!(error = %e, "Receiver failed, draining what was received");
                    failures.push(ThreadFailure::from_error(
                        ThreadRole::Receiver,
                        0,
                        &SkeinError::Receiver(e),
                    ));
                }
                Err(payload) => {
                    let failure = ThreadFailure::from_panic(ThreadRole::Receiver, 0, payload.as_ref());
                    error!(error = %failure.message, "Receiver thread panicked");
                    failures.push(failure);
                }
            },
            Err(e) => {
                error!(error = %e, "Receiver not started");
                self.cancel.cancel();
                failures.push(ThreadFailure::from_error(
                    ThreadRole::Orchestrator,
                    0,
                    &SkeinError::Other(e),
                ));
            }
        }

        // Draining: the input queue is closed; drones empty it and flush.
        self.state.advance(PipelineState::Draining);
        let mut last_log = Instant::now();
        while !hive.is_finished() {
            thread::sleep(DRAIN_POLL);
            if last_log.elapsed() >= DRAIN_LOG_INTERVAL {
                let snapshot = self.progress.snapshot();
                info!(
                    received = snapshot.received,
                    converted = snapshot.converted,
                    published = snapshot.published_rows,
                    in_flight = snapshot.in_flight(),
                    "Draining"
                );
                last_log = Instant::now();
            }
        }
        let hive_report = hive.join();
        failures.extend(hive_report.failures);

        // ShuttingDown: drones are gone, so the output queue is closed.
        let cancelled_early = self.cancel.is_cancelled();
        self.state.advance(PipelineState::ShuttingDown);
        self.cancel.cancel();

        let publish = match publisher.join() {
            Ok(outcome) => outcome,
            Err(payload) => {
                let failure = ThreadFailure::from_panic(ThreadRole::Publisher, 0, payload.as_ref());
                error!(error = %failure.message, "Publish thread panicked");
                failures.push(failure);
                PublishOutcome::default()
            }
        };
        if let Some(e) = publish.error {
            failures.push(ThreadFailure::from_error(
                ThreadRole::Publisher,
                0,
                &SkeinError::Publish(e),
            ));
        }

        let stats = AggregateStats {
            progress: self.progress.snapshot(),
            conversion: hive_report.total,
            per_drone: hive_report.per_drone,
            publish: publish.stats,
            rows_discarded: publish.rows_discarded,
            latencies: publish.latencies,
            cancelled: cancelled_early && failures.is_empty(),
            started_at,
            elapsed: started.elapsed(),
        };

        self.verify_drain(&stats, &mut failures);
        self.state.advance(PipelineState::Terminated);

        if config.statistics {
            stats.log(config.succinct);
        }
        self.write_outputs(&stats, &mut failures);

        if failures.is_empty() {
            Ok(stats)
        } else {
            for failure in &failures {
                error!(%failure, "Pipeline thread failed");
            }
            Err(PipelineFailure::new(failures).into())
        }
    }

    /// Unwinds a run whose hive did not start. The publisher is still joined
    /// and the state still ends at `Terminated`.
    fn abort_start(
        &self,
        input: QueueProducer<RawItem>,
        publisher: JoinHandle<PublishOutcome>,
        error: SkeinError,
    ) -> SkeinError {
        error!(error = %error, "Conversion hive not started");
        self.cancel.cancel();
        drop(input);
        self.state.advance(PipelineState::ShuttingDown);

        // Drones that did start exit on the token, which closes the output queue.
        if publisher.join().is_err() {
            error!("Publish thread panicked");
        }
        self.state.advance(PipelineState::Terminated);
        error
    }

    fn verify_drain(&self, stats: &AggregateStats, failures: &mut Vec<ThreadFailure>) {
        if stats.is_drained() {
            debug!(received = stats.received(), "Drain verified");
            return;
        }

        let in_flight = stats.in_flight();
        if stats.cancelled {
            warn!(in_flight, "Pipeline cancelled; queued items were discarded");
        } else if !failures.is_empty() {
            warn!(in_flight, "Items lost after a thread failure");
        } else {
            failures.push(ThreadFailure::new(
                ThreadRole::Orchestrator,
                0,
                ErrorKind::DrainIncomplete,
                format!(
                    "received {} items, published {} rows, {} parse failures, {} dropped",
                    stats.received(),
                    stats.rows_published(),
                    stats.parse_failures(),
                    stats.dropped_rows()
                ),
            ));
        }
    }

    fn write_outputs(&self, stats: &AggregateStats, failures: &mut Vec<ThreadFailure>) {
        let mut outputs = Vec::new();
        if let Some(path) = &self.config.latency_file {
            outputs.push(write_latency_csv(path, &stats.latencies).map(|()| path));
        }
        if let Some(path) = &self.config.metrics_file {
            outputs.push(stats.to_record(&self.config).append_to(path).map(|()| path));
        }

        for output in outputs {
            match output {
                Ok(path) => info!(path = %path.display(), "Wrote statistics file"),
                Err(e) => failures.push(ThreadFailure::from_error(ThreadRole::Orchestrator, 0, &e)),
            }
        }
    }
}

fn run_receiver(
    mut receiver: Box<dyn Receiver>,
    mut ingest: IngestHandle,
    cancel: CancellationToken,
) -> Result<ReceiveOutcome, ReceiverError> {
    let result = receiver.receive_loop(&mut ingest, &cancel);
    debug!(
        receiver = receiver.name(),
        items = ingest.pushed(),
        "Receiver loop returned"
    );
    // Dropping the handle closes the input queue.
    drop(ingest);
    result
}

/// Runs a pipeline with the receiver and broker its configuration names.
///
/// Unsupported variants (`Zmq` protocol, `Pulsar` broker) fail with
/// [`SkeinError::NotImplemented`] before any thread starts.
pub fn run_pipeline(config: PipelineConfig) -> Result<AggregateStats, SkeinError> {
    let orchestrator = StreamOrchestrator::from_config(config)?;
    let receiver = create_receiver(&orchestrator.config().protocol)?;
    let broker = create_broker(&orchestrator.config().broker)?;
    orchestrator.run(receiver, broker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sk_publish::MemoryBroker;
    use sk_types::{SchemaSpec, SerializedMessage};

    #[test]
    fn test_failed_start_joins_publisher_and_terminates() {
        let config =
            PipelineConfig::new().with_schema(SchemaSpec::parse_inline("v:int64").unwrap());
        let orchestrator = StreamOrchestrator::from_config(config).unwrap();
        let state = orchestrator.state();

        let (input_tx, _input_rx) = sk_queue::bounded::<RawItem>(Some(4));
        let (output_tx, output_rx) = sk_queue::bounded::<SerializedMessage>(Some(4));
        let broker = MemoryBroker::new();
        let publisher = PublishWorker::new(
            Box::new(broker.clone()),
            output_rx,
            orchestrator.cancellation_token(),
            orchestrator.progress(),
        )
        .spawn()
        .unwrap();
        // No drone holds the output queue open.
        drop(output_tx);

        let error = orchestrator.abort_start(
            input_tx,
            publisher,
            SkeinError::Other(anyhow::anyhow!("Failed to spawn drone 0")),
        );

        assert!(error.to_string().contains("Failed to spawn drone 0"));
        assert!(broker.is_closed());
        assert!(orchestrator.cancellation_token().is_cancelled());
        assert_eq!(state.get(), PipelineState::Terminated);
    }
}
