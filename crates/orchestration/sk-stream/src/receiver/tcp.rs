//! TCP receiver for raw newline-delimited JSON streams.

use sk_error::ReceiverError;
use sk_traits::{IngestHandle, ReceiveOutcome, Receiver};
use std::io::BufReader;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::pump_lines;

/// Connects to a JSON stream server and reads one record per line.
pub struct TcpReceiver {
    host: String,
    port: u16,
    name: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl TcpReceiver {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            name: format!("raw://{host}:{port}"),
            host,
            port,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_millis(100),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Longest blocking read between two cancellation checks.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn connect(&self) -> Result<TcpStream, ReceiverError> {
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ReceiverError::Connection(format!("{}: {e}", self.name)))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(%addr, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(ReceiverError::Connection(match last_error {
            Some(e) => format!("{}: {e}", self.name),
            None => format!("{}: no address resolved", self.name),
        }))
    }
}

impl Receiver for TcpReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive_loop(
        &mut self,
        ingest: &mut IngestHandle,
        cancel: &CancellationToken,
    ) -> Result<ReceiveOutcome, ReceiverError> {
        let stream = self.connect()?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        info!(source = %self.name, "Connected to stream");

        let mut reader = BufReader::with_capacity(64 * 1024, stream);
        pump_lines(&mut reader, ingest, cancel)
    }
}
