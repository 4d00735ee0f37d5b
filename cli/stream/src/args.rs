//! CLI argument definitions for skein.

use clap::{Parser, ValueEnum};
use humantime_serde::re::humantime;
use sk_cli_common::parse_byte_size;
pub use sk_cli_common::LogLevel;
use std::path::PathBuf;
use std::time::Duration;

/// Streams newline-delimited JSON into Arrow IPC messages.
///
/// Records are read from a TCP stream, stdin or a file, converted to Arrow
/// rows against a schema by a pool of drones, batched up to a size
/// threshold, serialized as Arrow IPC streams and handed to a broker.
///
/// Flags override values from `--config`.
///
/// ## Examples
///
/// Count what a local stream server produces:
///   skein -s schema.yaml -H localhost -p 5555 -d stats
///
/// Print rows from a file, one drone, small batches:
///   skein -f "id:int64,name:utf8?" -i input.jsonl -t 1 -b 64K -d stdout
#[derive(Parser, Debug)]
#[command(name = "skein")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// YAML (or JSON) pipeline configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    // === Input ===
    /// Stream protocol
    #[arg(long, value_enum)]
    pub protocol: Option<ProtocolArg>,

    /// Stream server host
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Stream server port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Read records from this file instead of a stream
    #[arg(short = 'i', long, conflicts_with_all = ["protocol", "host", "port"])]
    pub input: Option<PathBuf>,

    // === Schema ===
    /// Schema file (YAML or JSON with a `fields` list)
    #[arg(short = 's', long, conflicts_with = "fields")]
    pub schema: Option<PathBuf>,

    /// Inline schema, e.g. "id:int64,name:utf8?,tags:list<utf8>"
    #[arg(short = 'f', long)]
    pub fields: Option<String>,

    /// Reject records with fields outside the schema
    #[arg(long)]
    pub strict: bool,

    /// Prepend an ingest_seq column with each row's sequence number
    #[arg(long)]
    pub seq_column: bool,

    // === Conversion ===
    /// Number of conversion drones (must be >= 1)
    #[arg(short = 't', long, value_parser = parse_positive_usize)]
    pub drones: Option<usize>,

    /// Batch size threshold, e.g. 1M or 256KiB
    #[arg(short = 'b', long, value_parser = parse_byte_size)]
    pub batch_threshold: Option<usize>,

    /// Largest serialized message, e.g. 5110K
    #[arg(long, value_parser = parse_byte_size)]
    pub max_message_size: Option<usize>,

    /// Split batches into messages of at most this many rows (must be >= 1)
    #[arg(long = "max-rows", value_parser = parse_positive_usize)]
    pub max_rows: Option<usize>,

    /// Input queue capacity in records (must be >= 1)
    #[arg(long, value_parser = parse_positive_usize)]
    pub input_queue: Option<usize>,

    /// Output queue capacity in messages (must be >= 1)
    #[arg(long, value_parser = parse_positive_usize)]
    pub output_queue: Option<usize>,

    /// Flush partial batches whose oldest row waited this long, e.g. 250ms
    #[arg(long, value_parser = humantime::parse_duration)]
    pub idle_flush: Option<Duration>,

    // === Broker ===
    /// Broker to publish to
    #[arg(short = 'd', long, value_enum)]
    pub broker: Option<BrokerArg>,

    /// What the stdout broker prints
    #[arg(long, value_enum)]
    pub stdout_mode: Option<StdoutModeArg>,

    /// Pulsar service URL
    #[arg(long)]
    pub pulsar_url: Option<String>,

    /// Pulsar topic
    #[arg(long)]
    pub pulsar_topic: Option<String>,

    /// Retries for transient publish failures
    #[arg(long)]
    pub publish_retries: Option<u32>,

    /// Backoff before the first publish retry, doubled on each retry
    #[arg(long, value_parser = humantime::parse_duration)]
    pub publish_backoff: Option<Duration>,

    // === Statistics ===
    /// Do not log statistics at the end of the run
    #[arg(long)]
    pub no_statistics: bool,

    /// Log statistics as a single line
    #[arg(long)]
    pub succinct: bool,

    /// Write per-message latency samples as CSV
    #[arg(long)]
    pub latency_file: Option<PathBuf>,

    /// Append run statistics (CSV, or JSON lines for .json)
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    // === Progress Options ===
    /// Enable progress reporting to stderr
    #[arg(long)]
    pub progress: bool,

    /// Progress reporting interval in seconds
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..))]
    pub progress_interval: u64,

    // === Logging ===
    /// Log level
    #[arg(short = 'l', long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

/// Stream protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProtocolArg {
    /// Newline-delimited JSON over TCP
    Raw,
    /// ZeroMQ (not implemented)
    Zmq,
    /// Newline-delimited JSON on stdin
    Stdin,
}

/// Broker type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BrokerArg {
    /// Print messages to stdout
    Stdout,
    /// Count messages without output (for performance testing)
    Stats,
    /// Apache Pulsar (not implemented)
    Pulsar,
}

/// Stdout broker output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StdoutModeArg {
    /// Every row as a JSON line
    Rows,
    /// One line per message
    Summary,
}

impl From<StdoutModeArg> for sk_types::StdoutMode {
    fn from(arg: StdoutModeArg) -> Self {
        match arg {
            StdoutModeArg::Rows => sk_types::StdoutMode::Rows,
            StdoutModeArg::Summary => sk_types::StdoutMode::Summary,
        }
    }
}

/// Parse a positive usize (>= 1).
fn parse_positive_usize(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if value < 1 {
        return Err(format!("{} is not in 1..", value));
    }
    Ok(value)
}
