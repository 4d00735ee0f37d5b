//! Pool of conversion drones.

use anyhow::Context;
use sk_accumulator::BatchBuilder;
use sk_error::{SkeinError, ThreadFailure, ThreadRole};
use sk_queue::{QueueConsumer, QueueProducer};
use sk_traits::{Parser, Serializer};
use sk_types::{PipelineConfig, PipelineProgress, RawItem, SerializedMessage};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{ConversionStats, ConversionWorker, DroneOutcome, DroneSettings};

/// Running pool of drones.
///
/// The hive keeps no queue handles of its own: once every drone has exited,
/// the output queue closes and the publish worker can finish.
pub struct ConversionHive {
    handles: Vec<(usize, JoinHandle<DroneOutcome>)>,
}

/// Stats of one drone.
#[derive(Debug, Clone)]
pub struct DroneReport {
    pub drone: usize,
    pub stats: ConversionStats,
}

/// Outcome of a hive, produced once by [`ConversionHive::join`].
#[derive(Debug, Clone, Default)]
pub struct HiveReport {
    /// Sum over every drone that returned
    pub total: ConversionStats,

    pub per_drone: Vec<DroneReport>,

    /// Drones that panicked or could not serialize their rows
    pub failures: Vec<ThreadFailure>,
}

impl ConversionHive {
    /// Spawns `config.drone_count` drones.
    ///
    /// Every drone gets a clone of `input`, `output` and `cancel`, plus its own
    /// [`BatchBuilder`] over the shared parser and serializer.
    pub fn start(
        config: &PipelineConfig,
        parser: Arc<dyn Parser>,
        serializer: Arc<dyn Serializer>,
        input: QueueConsumer<RawItem>,
        output: QueueProducer<SerializedMessage>,
        cancel: CancellationToken,
        progress: Arc<PipelineProgress>,
    ) -> Result<Self, SkeinError> {
        let settings = DroneSettings::from_config(config);
        let mut handles = Vec::with_capacity(config.drone_count);

        for id in 0..config.drone_count {
            let builder = BatchBuilder::new(Arc::clone(&parser), Arc::clone(&serializer))
                .with_seq_column(config.seq_column)
                .with_max_rows(config.max_batch_rows);
            let drone = ConversionWorker::new(
                id,
                input.clone(),
                output.clone(),
                builder,
                settings,
                cancel.clone(),
                Arc::clone(&progress),
            );

            let handle = thread::Builder::new()
                .name(format!("skein-drone-{id}"))
                .spawn(move || drone.run())
                .with_context(|| format!("Failed to spawn drone {id}"))?;
            handles.push((id, handle));
        }

        info!(
            drones = handles.len(),
            threshold_bytes = settings.batch_threshold_bytes,
            "Conversion hive started"
        );
        Ok(Self { handles })
    }

    pub fn drone_count(&self) -> usize {
        self.handles.len()
    }

    /// True once every drone thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(|(_, h)| h.is_finished())
    }

    /// Joins every drone and merges their stats.
    pub fn join(self) -> HiveReport {
        let mut report = HiveReport::default();

        for (id, handle) in self.handles {
            match handle.join() {
                Ok(DroneOutcome { stats, error }) => {
                    if let Some(e) = error {
                        report.failures.push(ThreadFailure::from_error(
                            ThreadRole::Drone,
                            id,
                            &SkeinError::Serialize(e),
                        ));
                    }
                    report.total += &stats;
                    report.per_drone.push(DroneReport { drone: id, stats });
                }
                Err(payload) => {
                    let failure = ThreadFailure::from_panic(ThreadRole::Drone, id, payload.as_ref());
                    error!(drone = id, error = %failure.message, "Drone thread panicked");
                    report.failures.push(failure);
                }
            }
        }

        debug!(
            drones = report.per_drone.len(),
            items = report.total.items_converted,
            messages = report.total.messages,
            "Conversion hive joined"
        );
        report
    }
}
