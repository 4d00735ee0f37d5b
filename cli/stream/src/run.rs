//! Main execution logic for the skein CLI.

use anyhow::Result;
use sk_error::SkeinError;
use sk_publish::create_broker;
use sk_stream::{create_receiver, AggregateStats, StreamOrchestrator};
use sk_types::{BrokerTarget, PipelineConfig, SchemaSpec, StreamProtocol};
use tracing::info;

use crate::args::{BrokerArg, Cli, ProtocolArg};
use crate::progress::ProgressReporter;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5555;

/// Build the pipeline configuration: config file first, then flags.
pub fn build_config(args: &Cli) -> Result<PipelineConfig, SkeinError> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::new(),
    };

    if let Some(path) = &args.schema {
        config.schema = SchemaSpec::from_path(path)?;
    }
    if let Some(fields) = &args.fields {
        config.schema = SchemaSpec::parse_inline(fields)?;
    }
    config.strict_schema |= args.strict;
    config.seq_column |= args.seq_column;

    apply_protocol(args, &mut config);
    apply_broker(args, &mut config);

    if let Some(drones) = args.drones {
        config.drone_count = drones;
    }
    if let Some(threshold) = args.batch_threshold {
        config.batch_threshold_bytes = threshold;
    }
    if let Some(max) = args.max_message_size {
        config.max_message_bytes = max;
    }
    if let Some(rows) = args.max_rows {
        config.max_batch_rows = Some(rows);
    }
    if let Some(capacity) = args.input_queue {
        config.input_queue_capacity = Some(capacity);
    }
    if let Some(capacity) = args.output_queue {
        config.output_queue_capacity = Some(capacity);
    }
    if let Some(after) = args.idle_flush {
        config.idle_flush = Some(after);
    }

    if let Some(retries) = args.publish_retries {
        config.publish_retry.max_retries = retries;
    }
    if let Some(backoff) = args.publish_backoff {
        config.publish_retry.initial_backoff = backoff;
        config.publish_retry.max_backoff = config.publish_retry.max_backoff.max(backoff);
    }

    if args.no_statistics {
        config.statistics = false;
    }
    config.succinct |= args.succinct;
    if let Some(path) = &args.latency_file {
        config = config.with_latency_file(path);
    }
    if let Some(path) = &args.metrics_file {
        config = config.with_metrics_file(path);
    }

    config.validate().map_err(SkeinError::Config)?;
    Ok(config)
}

fn apply_protocol(args: &Cli, config: &mut PipelineConfig) {
    if let Some(path) = &args.input {
        config.protocol = StreamProtocol::File { path: path.clone() };
        return;
    }
    if args.protocol.is_none() && args.host.is_none() && args.port.is_none() {
        return;
    }

    let (current_kind, host, port) = match &config.protocol {
        StreamProtocol::Raw { host, port } => (ProtocolArg::Raw, host.clone(), *port),
        StreamProtocol::Zmq { host, port } => (ProtocolArg::Zmq, host.clone(), *port),
        _ => (ProtocolArg::Raw, DEFAULT_HOST.to_string(), DEFAULT_PORT),
    };
    let host = args.host.clone().unwrap_or(host);
    let port = args.port.unwrap_or(port);

    config.protocol = match args.protocol.unwrap_or(current_kind) {
        ProtocolArg::Raw => StreamProtocol::Raw { host, port },
        ProtocolArg::Zmq => StreamProtocol::Zmq { host, port },
        ProtocolArg::Stdin => StreamProtocol::Stdin,
    };
}

fn apply_broker(args: &Cli, config: &mut PipelineConfig) {
    if let Some(broker) = args.broker {
        config.broker = match broker {
            BrokerArg::Stdout => BrokerTarget::Stdout {
                mode: Default::default(),
            },
            BrokerArg::Stats => BrokerTarget::Stats,
            BrokerArg::Pulsar => BrokerTarget::default_pulsar(),
        };
    }

    match &mut config.broker {
        BrokerTarget::Stdout { mode } => {
            if let Some(m) = args.stdout_mode {
                *mode = m.into();
            }
        }
        BrokerTarget::Pulsar { url, topic } => {
            if let Some(u) = &args.pulsar_url {
                *url = u.clone();
            }
            if let Some(t) = &args.pulsar_topic {
                *topic = t.clone();
            }
        }
        BrokerTarget::Stats => {}
    }
}

/// Execute the pipeline with the provided arguments.
pub fn execute(args: &Cli) -> Result<AggregateStats> {
    let config = build_config(args)?;
    info!(
        protocol = %config.protocol,
        drones = config.drone_count,
        fields = config.schema.fields.len(),
        "Configuration loaded"
    );

    let orchestrator = StreamOrchestrator::from_config(config)?;
    let receiver = create_receiver(&orchestrator.config().protocol)?;
    let broker = create_broker(&orchestrator.config().broker)?;

    let mut reporter = ProgressReporter::new(args.progress, args.progress_interval);
    reporter.start(orchestrator.progress())?;

    let result = orchestrator.run(receiver, broker);
    reporter.stop();

    Ok(result?)
}
