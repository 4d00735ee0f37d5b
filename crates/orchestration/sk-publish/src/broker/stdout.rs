//! Stdout broker.

use arrow::error::ArrowError;
use sk_arrow::{decode_message, write_json_rows};
use sk_error::PublishError;
use sk_traits::BrokerClient;
use sk_types::{SerializedMessage, StdoutMode};
use std::io::{self, Write};

/// Broker that writes messages to stdout (or any writer).
///
/// Used for debugging and pipeline verification. In [`StdoutMode::Rows`]
/// every message is decoded back and printed as JSON lines; in
/// [`StdoutMode::Summary`] only one line per message is printed.
pub struct StdoutBroker {
    mode: StdoutMode,
    out: Box<dyn Write + Send>,
}

impl StdoutBroker {
    pub fn stdout(mode: StdoutMode) -> Self {
        Self::with_writer(mode, io::stdout())
    }

    pub fn with_writer(mode: StdoutMode, out: impl Write + Send + 'static) -> Self {
        Self {
            mode,
            out: Box::new(out),
        }
    }

    pub fn mode(&self) -> StdoutMode {
        self.mode
    }
}

impl Default for StdoutBroker {
    fn default() -> Self {
        Self::stdout(StdoutMode::Rows)
    }
}

fn io_error(e: io::Error) -> PublishError {
    PublishError::Connection(format!("stdout: {e}"))
}

impl BrokerClient for StdoutBroker {
    fn name(&self) -> &str {
        "stdout"
    }

    fn publish(&mut self, message: &SerializedMessage) -> Result<(), PublishError> {
        match self.mode {
            StdoutMode::Rows => {
                let batch = decode_message(message.payload())
                    .map_err(|e| PublishError::Rejected(format!("Undecodable message: {e}")))?;
                write_json_rows(&mut self.out, &batch).map_err(|e| match e {
                    ArrowError::IoError(_, err) => io_error(err),
                    other => PublishError::Rejected(other.to_string()),
                })
            }
            StdoutMode::Summary => {
                let seq = message
                    .seq_range()
                    .map_or_else(|| "-".to_string(), |r| r.to_string());
                writeln!(
                    self.out,
                    "message rows={} bytes={} seq={}",
                    message.row_count(),
                    message.len(),
                    seq
                )
                .map_err(io_error)
            }
        }
    }

    fn close(&mut self) -> Result<(), PublishError> {
        self.out.flush().map_err(io_error)
    }
}
