//! skein CLI
//!
//! Streams newline-delimited JSON into Arrow IPC messages and publishes them.

use clap::Parser;
use sk_cli_common::{format_bytes, format_number, init_logging};
use sk_error::SkeinError;
use std::process::ExitCode;
use tracing::error;

mod args;
mod progress;
mod run;

use args::Cli;

/// Configuration errors exit with 2, every other failure with 1.
const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;

fn main() -> ExitCode {
    let args = Cli::parse();

    if let Err(e) = init_logging(args.log_level) {
        eprintln!("{e:#}");
        return ExitCode::from(EXIT_FAILURE);
    }

    let stats = match run::execute(&args) {
        Ok(stats) => stats,
        Err(e) => {
            error!("{e:#}");
            let code = match e.downcast_ref::<SkeinError>() {
                Some(SkeinError::Config(_)) => EXIT_CONFIG,
                _ => EXIT_FAILURE,
            };
            return ExitCode::from(code);
        }
    };

    // Report results to stderr
    eprintln!();
    eprintln!("skein completed:");
    eprintln!("  Records received:  {}", format_number(stats.received()));
    eprintln!("  Bytes received:    {}", format_bytes(stats.received_bytes()));
    eprintln!("  Parse errors:      {}", format_number(stats.parse_failures()));
    eprintln!("  Rows published:    {}", format_number(stats.rows_published()));
    eprintln!(
        "  Messages:          {} ({})",
        format_number(stats.messages_published()),
        format_bytes(stats.publish.bytes_published)
    );
    if stats.dropped_rows() > 0 {
        eprintln!("  Rows dropped:      {}", format_number(stats.dropped_rows()));
    }

    let secs = stats.elapsed.as_secs_f64();
    eprintln!("  Duration:          {:.2}s", secs);
    if secs > 0.0 && stats.received() > 0 {
        eprintln!(
            "  Throughput:        {} records/sec",
            format_number(stats.items_per_second() as u64)
        );
    }
    if stats.cancelled {
        eprintln!("  Cancelled before the stream ended");
    }

    ExitCode::SUCCESS
}
