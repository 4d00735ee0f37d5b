//! Line receiver over any buffered reader.

use sk_error::ReceiverError;
use sk_traits::{IngestHandle, ReceiveOutcome, Receiver};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Stdin};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::pump_lines;

/// Reads newline-delimited JSON from a reader until EOF.
///
/// Cancellation is checked between lines; a blocking read without timeout
/// (stdin) only notices it once the next line or EOF arrives.
pub struct LineReceiver<R> {
    name: String,
    reader: R,
}

impl<R: BufRead + Send> LineReceiver<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
        }
    }
}

impl LineReceiver<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new("stdin", BufReader::new(io::stdin()))
    }
}

impl LineReceiver<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, ReceiverError> {
        let file = File::open(path)
            .map_err(|e| ReceiverError::Io(format!("{}: {e}", path.display())))?;
        Ok(Self::new(
            format!("file://{}", path.display()),
            BufReader::with_capacity(256 * 1024, file),
        ))
    }
}

impl<R: BufRead + Send> Receiver for LineReceiver<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive_loop(
        &mut self,
        ingest: &mut IngestHandle,
        cancel: &CancellationToken,
    ) -> Result<ReceiveOutcome, ReceiverError> {
        info!(source = %self.name, "Reading stream");
        pump_lines(&mut self.reader, ingest, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sk_types::PipelineProgress;
    use std::io::{Cursor, Write};
    use std::sync::Arc;

    #[test]
    fn test_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"v":1}}"#).unwrap();
        writeln!(file, r#"{{"v":2}}"#).unwrap();

        let mut receiver = LineReceiver::open(file.path()).unwrap();
        assert!(receiver.name().starts_with("file://"));

        let (tx, rx) = sk_queue::bounded(Some(4));
        let mut ingest = IngestHandle::new(tx, Arc::new(PipelineProgress::new()));
        let outcome = receiver
            .receive_loop(&mut ingest, &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome, ReceiveOutcome::EndOfStream);
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn test_reads_in_memory_reader() {
        let mut receiver = LineReceiver::new("memory", Cursor::new(b"{}\n{}\n{}\n".to_vec()));
        let (tx, rx) = sk_queue::bounded(None);
        let mut ingest = IngestHandle::new(tx, Arc::new(PipelineProgress::new()));

        receiver
            .receive_loop(&mut ingest, &CancellationToken::new())
            .unwrap();
        assert_eq!(ingest.pushed(), 3);
        assert_eq!(rx.len(), 3);
    }
}
