//! Pipeline configuration.

use serde::{Deserialize, Serialize};
use sk_error::SkeinError;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::schema::{SchemaSpec, SEQ_COLUMN_NAME};

/// Default batch threshold (1 MiB of Arrow memory per drone).
pub const DEFAULT_BATCH_THRESHOLD_BYTES: usize = 1024 * 1024;

/// Default wire message limit: 5 MiB minus 10 KiB of headroom for broker
/// framing, the usual default frame limit of message brokers.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 5 * 1024 * 1024 - 10 * 1024;

/// Default input queue capacity in items.
pub const DEFAULT_INPUT_QUEUE_CAPACITY: usize = 4096;

/// Default output queue capacity in messages.
pub const DEFAULT_OUTPUT_QUEUE_CAPACITY: usize = 256;

/// Transport used to receive JSON records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamProtocol {
    /// Newline-delimited JSON over a plain TCP connection
    Raw { host: String, port: u16 },

    /// ZeroMQ subscription (recognised, not implemented)
    Zmq { host: String, port: u16 },

    /// Newline-delimited JSON from standard input
    Stdin,

    /// Newline-delimited JSON from a file
    File { path: PathBuf },
}

impl Default for StreamProtocol {
    fn default() -> Self {
        Self::Raw {
            host: "localhost".to_string(),
            port: 5555,
        }
    }
}

impl std::fmt::Display for StreamProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw { host, port } => write!(f, "raw://{host}:{port}"),
            Self::Zmq { host, port } => write!(f, "zmq://{host}:{port}"),
            Self::Stdin => write!(f, "stdin"),
            Self::File { path } => write!(f, "file://{}", path.display()),
        }
    }
}

/// How the stdout broker renders messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdoutMode {
    /// Decode and print every row as a JSON line
    #[default]
    Rows,
    /// One summary line per message
    Summary,
}

/// Where serialized messages are published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BrokerTarget {
    /// Print to stdout
    Stdout {
        #[serde(default)]
        mode: StdoutMode,
    },

    /// Count messages and discard them
    Stats,

    /// Apache Pulsar topic (recognised, not implemented)
    Pulsar { url: String, topic: String },
}

impl Default for BrokerTarget {
    fn default() -> Self {
        Self::Stats
    }
}

impl BrokerTarget {
    /// The Pulsar target with the conventional local defaults.
    pub fn default_pulsar() -> Self {
        Self::Pulsar {
            url: "pulsar://localhost:6650/".to_string(),
            topic: "persistent://public/default/skein".to_string(),
        }
    }
}

/// Retry policy for failed publishes.
///
/// With `max_retries == 0` the first failure is fatal to the publish worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,

    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based), doubling each time.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Configuration snapshot for one pipeline run.
///
/// Built once before the run starts and shared read-only by every thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of conversion drones
    pub drone_count: usize,

    /// Arrow memory size at which a drone finalizes its batch
    pub batch_threshold_bytes: usize,

    /// Input queue capacity in items (`None` for unbounded)
    pub input_queue_capacity: Option<usize>,

    /// Output queue capacity in messages (`None` for unbounded)
    pub output_queue_capacity: Option<usize>,

    /// Upper bound on the size of one serialized message
    pub max_message_bytes: usize,

    /// Split finished batches into messages of at most this many rows
    pub max_batch_rows: Option<usize>,

    /// Schema of incoming records
    pub schema: SchemaSpec,

    /// Reject records carrying fields outside the schema
    pub strict_schema: bool,

    /// Prepend a `ingest_seq` column holding each row's sequence number
    pub seq_column: bool,

    /// Source of JSON records
    pub protocol: StreamProtocol,

    /// Destination of serialized messages
    pub broker: BrokerTarget,

    /// Publish retry policy
    pub publish_retry: RetryPolicy,

    /// How long workers wait on an empty queue before checking for cancellation
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Flush a partial batch once its oldest row has waited this long
    #[serde(with = "humantime_serde")]
    pub idle_flush: Option<Duration>,

    /// Log aggregate statistics at the end of the run
    pub statistics: bool,

    /// Log statistics as a single line
    pub succinct: bool,

    /// Keep per-message latency samples
    pub track_latency: bool,

    /// Write latency samples as CSV here
    pub latency_file: Option<PathBuf>,

    /// Append the run's flat statistics record here
    pub metrics_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            drone_count: num_cpus(),
            batch_threshold_bytes: DEFAULT_BATCH_THRESHOLD_BYTES,
            input_queue_capacity: Some(DEFAULT_INPUT_QUEUE_CAPACITY),
            output_queue_capacity: Some(DEFAULT_OUTPUT_QUEUE_CAPACITY),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_batch_rows: None,
            schema: SchemaSpec::default(),
            strict_schema: false,
            seq_column: false,
            protocol: StreamProtocol::default(),
            broker: BrokerTarget::default(),
            publish_retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(10),
            idle_flush: None,
            statistics: true,
            succinct: false,
            track_latency: false,
            latency_file: None,
            metrics_file: None,
        }
    }
}

impl PipelineConfig {
    /// Create a new pipeline configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration file (YAML or JSON). Missing keys take defaults.
    pub fn from_file(path: &Path) -> Result<Self, SkeinError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SkeinError::Config(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&text).map_err(|e| {
            SkeinError::Config(format!("Invalid config file {}: {e}", path.display()))
        })
    }

    /// Set the number of conversion drones.
    pub fn with_drone_count(mut self, count: usize) -> Self {
        self.drone_count = count;
        self
    }

    /// Set the batch threshold in bytes.
    pub fn with_batch_threshold_bytes(mut self, threshold: usize) -> Self {
        self.batch_threshold_bytes = threshold;
        self
    }

    /// Set the input queue capacity (`None` for unbounded).
    pub fn with_input_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.input_queue_capacity = capacity;
        self
    }

    /// Set the output queue capacity (`None` for unbounded).
    pub fn with_output_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.output_queue_capacity = capacity;
        self
    }

    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }

    /// Cap the rows per published message (`None` for no cap).
    pub fn with_max_batch_rows(mut self, max_rows: Option<usize>) -> Self {
        self.max_batch_rows = max_rows;
        self
    }

    pub fn with_schema(mut self, schema: SchemaSpec) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_strict_schema(mut self, strict: bool) -> Self {
        self.strict_schema = strict;
        self
    }

    pub fn with_seq_column(mut self, enabled: bool) -> Self {
        self.seq_column = enabled;
        self
    }

    pub fn with_protocol(mut self, protocol: StreamProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_broker(mut self, broker: BrokerTarget) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_publish_retry(mut self, retry: RetryPolicy) -> Self {
        self.publish_retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Flush partial batches whose oldest row is older than `after`.
    pub fn with_idle_flush(mut self, after: Duration) -> Self {
        self.idle_flush = Some(after);
        self
    }

    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.statistics = enabled;
        self
    }

    pub fn with_succinct(mut self, succinct: bool) -> Self {
        self.succinct = succinct;
        self
    }

    pub fn with_track_latency(mut self, enabled: bool) -> Self {
        self.track_latency = enabled;
        self
    }

    /// Write latency samples to `path`. Implies latency tracking.
    pub fn with_latency_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.latency_file = Some(path.into());
        self.track_latency = true;
        self
    }

    pub fn with_metrics_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.metrics_file = Some(path.into());
        self
    }

    /// Whether the publish worker should keep latency samples.
    pub fn latency_enabled(&self) -> bool {
        self.track_latency || self.latency_file.is_some()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.drone_count == 0 {
            return Err("drone_count must be at least 1".to_string());
        }
        if self.batch_threshold_bytes == 0 {
            return Err("batch_threshold_bytes must be at least 1".to_string());
        }
        if self.input_queue_capacity == Some(0) {
            return Err("input_queue_capacity must be at least 1".to_string());
        }
        if self.output_queue_capacity == Some(0) {
            return Err("output_queue_capacity must be at least 1".to_string());
        }
        if self.max_message_bytes == 0 {
            return Err("max_message_bytes must be at least 1".to_string());
        }
        if self.max_batch_rows == Some(0) {
            return Err("max_batch_rows must be at least 1".to_string());
        }
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be greater than zero".to_string());
        }
        if self.idle_flush.is_some_and(|d| d.is_zero()) {
            return Err("idle_flush must be greater than zero".to_string());
        }
        if self.publish_retry.max_backoff < self.publish_retry.initial_backoff {
            return Err("publish_retry.max_backoff must not be below initial_backoff".to_string());
        }
        self.schema.validate()?;
        if self.seq_column && self.schema.contains(SEQ_COLUMN_NAME) {
            return Err(format!(
                "schema field '{SEQ_COLUMN_NAME}' clashes with the sequence column"
            ));
        }
        Ok(())
    }
}

/// Get the number of available CPUs.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> SchemaSpec {
        SchemaSpec::parse_inline("seq:int64,v:int64").unwrap()
    }

    #[test]
    fn test_pipeline_config_defaults() {
        let config = PipelineConfig::new();

        assert!(config.drone_count >= 1);
        assert_eq!(config.batch_threshold_bytes, DEFAULT_BATCH_THRESHOLD_BYTES);
        assert_eq!(config.input_queue_capacity, Some(DEFAULT_INPUT_QUEUE_CAPACITY));
        assert_eq!(config.output_queue_capacity, Some(DEFAULT_OUTPUT_QUEUE_CAPACITY));
        assert_eq!(config.max_message_bytes, 5_232_640);
        assert_eq!(config.max_batch_rows, None);
        assert_eq!(config.broker, BrokerTarget::Stats);
        assert!(config.statistics);
        assert!(!config.succinct);
        assert!(!config.latency_enabled());
    }

    #[test]
    fn test_pipeline_config_builder() {
        let config = PipelineConfig::new()
            .with_drone_count(3)
            .with_batch_threshold_bytes(4096)
            .with_input_queue_capacity(None)
            .with_schema(schema())
            .with_seq_column(true)
            .with_idle_flush(Duration::from_millis(50))
            .with_latency_file("/tmp/latency.csv");

        assert_eq!(config.drone_count, 3);
        assert_eq!(config.batch_threshold_bytes, 4096);
        assert_eq!(config.input_queue_capacity, None);
        assert_eq!(config.idle_flush, Some(Duration::from_millis(50)));
        assert!(config.latency_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_config_validation() {
        // An empty schema is not runnable.
        assert!(PipelineConfig::new().validate().is_err());

        let valid = PipelineConfig::new().with_schema(schema());
        assert!(valid.validate().is_ok());

        let invalid = valid.clone().with_drone_count(0);
        assert!(invalid.validate().is_err());

        let invalid = valid.clone().with_batch_threshold_bytes(0);
        assert!(invalid.validate().is_err());

        let invalid = valid.clone().with_output_queue_capacity(Some(0));
        assert!(invalid.validate().is_err());

        let invalid = valid.clone().with_poll_interval(Duration::ZERO);
        assert!(invalid.validate().is_err());

        let invalid = valid.clone().with_max_batch_rows(Some(0));
        assert!(invalid.validate().is_err());
        assert!(valid.clone().with_max_batch_rows(Some(1)).validate().is_ok());

        let clash = PipelineConfig::new()
            .with_schema(SchemaSpec::parse_inline("ingest_seq:uint64").unwrap())
            .with_seq_column(true);
        assert!(clash.validate().unwrap_err().contains("ingest_seq"));
    }

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
drone_count: 2
batch_threshold_bytes: 65536
max_batch_rows: 1024
poll_interval: 5ms
idle_flush: 250ms
protocol:
  type: raw
  host: 10.0.0.1
  port: 9000
broker:
  type: pulsar
  url: pulsar://broker:6650/
  topic: persistent://public/default/events
schema:
  fields:
    - name: seq
      type: uint64
publish_retry:
  max_retries: 3
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.drone_count, 2);
        assert_eq!(config.max_batch_rows, Some(1024));
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.idle_flush, Some(Duration::from_millis(250)));
        assert_eq!(
            config.protocol,
            StreamProtocol::Raw {
                host: "10.0.0.1".to_string(),
                port: 9000
            }
        );
        assert!(matches!(config.broker, BrokerTarget::Pulsar { .. }));
        assert_eq!(config.publish_retry.max_retries, 3);
        assert_eq!(config.publish_retry.initial_backoff, Duration::from_millis(100));
        // Untouched keys keep their defaults.
        assert_eq!(config.max_message_bytes, DEFAULT_MAX_MESSAGE_BYTES);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(StreamProtocol::default().to_string(), "raw://localhost:5555");
        assert_eq!(StreamProtocol::Stdin.to_string(), "stdin");
    }
}
