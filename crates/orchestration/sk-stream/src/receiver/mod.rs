//! Receivers for newline-delimited JSON sources.

mod lines;
mod tcp;

pub use lines::LineReceiver;
pub use tcp::TcpReceiver;

use sk_error::{QueueClosed, ReceiverError, SkeinError};
use sk_traits::{IngestHandle, ReceiveOutcome, Receiver};
use sk_types::StreamProtocol;
use std::io::{BufRead, ErrorKind};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Builds the receiver for a configured protocol.
///
/// `Zmq` is recognised but has no receiver yet and yields
/// [`SkeinError::NotImplemented`].
pub fn create_receiver(protocol: &StreamProtocol) -> Result<Box<dyn Receiver>, SkeinError> {
    match protocol {
        StreamProtocol::Raw { host, port } => Ok(Box::new(TcpReceiver::new(host.clone(), *port))),
        StreamProtocol::Zmq { host, port } => Err(SkeinError::NotImplemented(format!(
            "ZeroMQ stream protocol (zmq://{host}:{port})"
        ))),
        StreamProtocol::Stdin => Ok(Box::new(LineReceiver::stdin())),
        StreamProtocol::File { path } => Ok(Box::new(LineReceiver::open(path)?)),
    }
}

/// Pushes one item per non-empty line of `reader` until EOF.
///
/// Read timeouts (`WouldBlock`/`TimedOut`) are treated as a chance to check
/// `cancel`; bytes of a line read before the timeout are kept.
pub(crate) fn pump_lines<R: BufRead>(
    reader: &mut R,
    ingest: &mut IngestHandle,
    cancel: &CancellationToken,
) -> Result<ReceiveOutcome, ReceiverError> {
    let mut line = Vec::with_capacity(4096);

    loop {
        if cancel.is_cancelled() {
            return Ok(ReceiveOutcome::Cancelled);
        }

        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                // EOF; a last line without terminator still counts.
                if push_line(&line, ingest).is_err() {
                    return Ok(ReceiveOutcome::DownstreamClosed);
                }
                return Ok(ReceiveOutcome::EndOfStream);
            }
            Ok(_) => {
                if line.last() != Some(&b'\n') {
                    continue;
                }
                if push_line(&line, ingest).is_err() {
                    return Ok(ReceiveOutcome::DownstreamClosed);
                }
                line.clear();
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                trace!(pending = line.len(), "Read timed out");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn push_line(line: &[u8], ingest: &mut IngestHandle) -> Result<(), QueueClosed> {
    let record = line.trim_ascii();
    if record.is_empty() {
        return Ok(());
    }
    ingest.push(bytes::Bytes::copy_from_slice(record))?;
    Ok(())
}
