//! Aggregate statistics of a run, and their file exports.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sk_convert::{ConversionStats, DroneReport};
use sk_error::SkeinError;
use sk_publish::{LatencySample, LatencySummary, PublishStats};
use sk_types::{PipelineConfig, ProgressSnapshot};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Everything one orchestrator run measured.
#[derive(Debug, Clone, Default)]
pub struct AggregateStats {
    /// Final values of the shared counters
    pub progress: ProgressSnapshot,

    /// Sum over every drone
    pub conversion: ConversionStats,

    pub per_drone: Vec<DroneReport>,

    pub publish: PublishStats,

    /// Rows the publisher discarded after a fatal publish error
    pub rows_discarded: u64,

    /// Per-message latency samples, empty unless tracking was enabled
    pub latencies: Vec<LatencySample>,

    /// The run was cancelled from outside before the receiver finished
    pub cancelled: bool,

    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl AggregateStats {
    pub fn received(&self) -> u64 {
        self.progress.received
    }

    pub fn received_bytes(&self) -> u64 {
        self.progress.received_bytes
    }

    pub fn items_converted(&self) -> u64 {
        self.conversion.items_converted
    }

    pub fn parse_failures(&self) -> u64 {
        self.conversion.parse_failures
    }

    /// Parsed rows that never reached the broker.
    pub fn dropped_rows(&self) -> u64 {
        self.conversion.rows_dropped + self.rows_discarded
    }

    pub fn messages_published(&self) -> u64 {
        self.publish.messages_published
    }

    pub fn rows_published(&self) -> u64 {
        self.publish.rows_published
    }

    /// Items received but never accounted for as published, failed or dropped.
    pub fn in_flight(&self) -> u64 {
        self.received()
            .saturating_sub(self.rows_published() + self.parse_failures() + self.dropped_rows())
    }

    /// Every received item reached a terminal outcome.
    pub fn is_drained(&self) -> bool {
        self.in_flight() == 0
    }

    /// Received items per second of wall time.
    pub fn items_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.received() as f64 / secs
        } else {
            0.0
        }
    }

    pub fn latency_summary(&self) -> LatencySummary {
        LatencySummary::from_samples(&self.latencies)
    }

    /// Flattens the stats into one exportable record.
    pub fn to_record(&self, config: &PipelineConfig) -> StatsRecord {
        let latency = self.latency_summary();
        StatsRecord {
            timestamp: self.started_at.to_rfc3339(),
            drones: config.drone_count,
            batch_threshold_bytes: config.batch_threshold_bytes,
            received: self.received(),
            received_bytes: self.received_bytes(),
            converted: self.items_converted(),
            parse_failures: self.parse_failures(),
            dropped_rows: self.dropped_rows(),
            messages: self.messages_published(),
            rows_published: self.rows_published(),
            bytes_published: self.publish.bytes_published,
            publish_retries: self.publish.retries,
            elapsed_ms: millis(self.elapsed),
            parse_ms: millis(self.conversion.parse_time),
            combine_ms: millis(self.conversion.combine_time),
            serialize_ms: millis(self.conversion.serialize_time),
            enqueue_ms: millis(self.conversion.enqueue_time),
            publish_ms: millis(self.publish.publish_time),
            items_per_second: self.items_per_second(),
            latency_samples: latency.samples,
            latency_mean_us: micros(latency.mean),
            latency_max_us: micros(latency.max),
        }
    }

    /// Logs the statistics report; a single line when `succinct`.
    pub fn log(&self, succinct: bool) {
        if succinct {
            info!(
                received = self.received(),
                converted = self.items_converted(),
                parse_failures = self.parse_failures(),
                dropped = self.dropped_rows(),
                messages = self.messages_published(),
                rows = self.rows_published(),
                bytes = self.publish.bytes_published,
                elapsed_s = self.elapsed.as_secs_f64(),
                items_per_s = self.items_per_second(),
                "Pipeline stats"
            );
            return;
        }

        let c = &self.conversion;
        info!("Pipeline statistics");
        info!(
            items = self.received(),
            bytes = self.received_bytes(),
            "  Received"
        );
        info!(
            items = c.items_converted,
            parse_failures = c.parse_failures,
            json_mib_per_s = c.parse_mib_per_second(),
            "  Converted"
        );
        info!(
            parse_s = c.parse_time.as_secs_f64(),
            combine_s = c.combine_time.as_secs_f64(),
            serialize_s = c.serialize_time.as_secs_f64(),
            enqueue_s = c.enqueue_time.as_secs_f64(),
            "  Conversion time (summed over drones)"
        );
        for drone in &self.per_drone {
            info!(
                drone = drone.drone,
                items = drone.stats.items_converted,
                messages = drone.stats.messages,
                busy_s = drone.stats.busy_time().as_secs_f64(),
                thread_s = drone.stats.thread_time.as_secs_f64(),
                "    Drone"
            );
        }
        info!(
            messages = self.messages_published(),
            rows = self.rows_published(),
            bytes = self.publish.bytes_published,
            retries = self.publish.retries,
            publish_s = self.publish.publish_time.as_secs_f64(),
            "  Published"
        );
        if self.dropped_rows() > 0 {
            info!(rows = self.dropped_rows(), "  Dropped");
        }
        if !self.latencies.is_empty() {
            let latency = self.latency_summary();
            info!(
                samples = latency.samples,
                min_us = micros(latency.min),
                mean_us = micros(latency.mean),
                max_us = micros(latency.max),
                "  Latency (receive to publish)"
            );
        }
        info!(
            elapsed_s = self.elapsed.as_secs_f64(),
            items_per_s = self.items_per_second(),
            "  Total"
        );
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1e3
}

fn micros(d: Duration) -> u64 {
    d.as_micros() as u64
}

/// Flat statistics of one run, one CSV row or JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsRecord {
    pub timestamp: String,
    pub drones: usize,
    pub batch_threshold_bytes: usize,
    pub received: u64,
    pub received_bytes: u64,
    pub converted: u64,
    pub parse_failures: u64,
    pub dropped_rows: u64,
    pub messages: u64,
    pub rows_published: u64,
    pub bytes_published: u64,
    pub publish_retries: u64,
    pub elapsed_ms: f64,
    pub parse_ms: f64,
    pub combine_ms: f64,
    pub serialize_ms: f64,
    pub enqueue_ms: f64,
    pub publish_ms: f64,
    pub items_per_second: f64,
    pub latency_samples: usize,
    pub latency_mean_us: u64,
    pub latency_max_us: u64,
}

impl StatsRecord {
    /// Appends the record to `path`.
    ///
    /// A `.json` path gets one JSON object per line; anything else gets CSV,
    /// with a header row when the file is new or empty.
    pub fn append_to(&self, path: &Path) -> Result<(), SkeinError> {
        let is_new = std::fs::metadata(path).map_or(true, |m| m.len() == 0);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| metrics_error(path, e))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            let line = serde_json::to_string(self).map_err(|e| metrics_error(path, e))?;
            writeln!(file, "{line}").map_err(|e| metrics_error(path, e))?;
            return Ok(());
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        writer.serialize(self).map_err(|e| metrics_error(path, e))?;
        writer.flush().map_err(|e| metrics_error(path, e))?;
        Ok(())
    }
}

fn metrics_error(path: &Path, e: impl std::fmt::Display) -> SkeinError {
    SkeinError::Other(anyhow::anyhow!(
        "Failed to write metrics file {}: {e}",
        path.display()
    ))
}

#[derive(Serialize)]
struct LatencyRow {
    #[serde(rename = "First")]
    first: Option<u64>,
    #[serde(rename = "Last")]
    last: Option<u64>,
    #[serde(rename = "Serialized")]
    serialized_ns: u64,
    #[serde(rename = "Published")]
    published_ns: u64,
}

/// Writes latency samples as CSV: sequence range, then nanoseconds from the
/// oldest row's receive time to serialization and to publication.
pub fn write_latency_csv(path: &Path, samples: &[LatencySample]) -> Result<(), SkeinError> {
    let error = |e: &dyn std::fmt::Display| {
        SkeinError::Other(anyhow::anyhow!(
            "Failed to write latency file {}: {e}",
            path.display()
        ))
    };

    let file = File::create(path).map_err(|e| error(&e))?;
    let mut writer = csv::Writer::from_writer(file);
    if samples.is_empty() {
        writer
            .write_record(["First", "Last", "Serialized", "Published"])
            .map_err(|e| error(&e))?;
    }
    for sample in samples {
        writer
            .serialize(LatencyRow {
                first: sample.seq_range.map(|r| r.first),
                last: sample.seq_range.map(|r| r.last),
                serialized_ns: sample.convert_latency().as_nanos() as u64,
                published_ns: sample.total().as_nanos() as u64,
            })
            .map_err(|e| error(&e))?;
    }
    writer.flush().map_err(|e| error(&e))?;
    Ok(())
}
