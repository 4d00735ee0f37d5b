//! Progress reporting for skein.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Sender};
use sk_cli_common::{format_bytes, format_number};
use sk_types::{PipelineProgress, ProgressSnapshot};
use std::io::{self, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Periodic progress lines on stderr while a pipeline runs.
pub struct ProgressReporter {
    /// Whether progress reporting is enabled
    enabled: bool,
    /// Reporting interval
    interval: Duration,
    /// Dropped or signalled to stop the reporter thread
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    progress: Option<Arc<PipelineProgress>>,
    start_time: Instant,
}

impl ProgressReporter {
    pub fn new(enabled: bool, interval_secs: u64) -> Self {
        Self {
            enabled,
            interval: Duration::from_secs(interval_secs),
            stop: None,
            handle: None,
            progress: None,
            start_time: Instant::now(),
        }
    }

    /// Start the background reporter thread.
    pub fn start(&mut self, progress: Arc<PipelineProgress>) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let interval = self.interval;
        let start_time = self.start_time;
        let shared = Arc::clone(&progress);

        let handle = thread::Builder::new()
            .name("skein-progress".to_string())
            .spawn(move || {
                // Any message or a disconnect ends the loop.
                while stop_rx.recv_timeout(interval).is_err_and(|e| e.is_timeout()) {
                    let line = progress_line(&shared.snapshot(), start_time.elapsed());
                    let _ = writeln!(io::stderr(), "[Progress] {line}");
                }
            })
            .context("Failed to spawn progress reporter")?;

        self.stop = Some(stop_tx);
        self.handle = Some(handle);
        self.progress = Some(progress);
        Ok(())
    }

    /// Stop the reporter and print the final line.
    pub fn stop(mut self) {
        if !self.enabled {
            return;
        }

        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }

        if let Some(progress) = &self.progress {
            let line = progress_line(&progress.snapshot(), self.start_time.elapsed());
            let _ = writeln!(io::stderr(), "[Progress] Complete: {line}");
        }
    }
}

fn progress_line(snapshot: &ProgressSnapshot, elapsed: Duration) -> String {
    format!(
        "{} received ({}), {} published in {} messages, {} parse errors, {} in flight ({:.1}s elapsed)",
        format_number(snapshot.received),
        format_bytes(snapshot.received_bytes),
        format_number(snapshot.published_rows),
        format_number(snapshot.published_messages),
        format_number(snapshot.parse_failures),
        format_number(snapshot.in_flight()),
        elapsed.as_secs_f64()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_line() {
        let snapshot = ProgressSnapshot {
            received: 12_345,
            received_bytes: 2048,
            published_rows: 12_000,
            published_messages: 3,
            parse_failures: 5,
            ..ProgressSnapshot::default()
        };
        assert_eq!(
            progress_line(&snapshot, Duration::from_millis(1500)),
            "12,345 received (2.00 KB), 12,000 published in 3 messages, 5 parse errors, 340 in flight (1.5s elapsed)"
        );
    }

    #[test]
    fn test_reporter_start_and_stop() {
        let mut reporter = ProgressReporter::new(true, 1);
        reporter.start(Arc::new(PipelineProgress::new())).unwrap();
        reporter.stop();

        // Disabled reporters never spawn.
        let mut disabled = ProgressReporter::new(false, 1);
        disabled.start(Arc::new(PipelineProgress::new())).unwrap();
        assert!(disabled.handle.is_none());
        disabled.stop();
    }
}
