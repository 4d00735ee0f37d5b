//! Error types and classification for skein.
//!
//! This crate provides:
//! - [`SkeinError`] - Top-level error enum for all pipeline errors
//! - Stage errors ([`ParseError`], [`SerializeError`], [`PublishError`], [`ReceiverError`])
//! - [`QueueClosed`], the orderly shutdown signal of the pipeline queues
//! - [`ThreadFailure`] and [`PipelineFailure`] for the aggregated multi-thread report
//! - [`ErrorCategory`] for retry and shutdown decisions

use std::fmt;

use thiserror::Error;

/// Top-level error type for skein.
#[derive(Error, Debug)]
pub enum SkeinError {
    /// A JSON payload could not be turned into a row
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// A finished batch could not be encoded into a wire message
    #[error("Serialize error: {0}")]
    Serialize(#[from] SerializeError),

    /// The broker refused or failed a publish
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// The input source failed
    #[error("Receiver error: {0}")]
    Receiver(#[from] ReceiverError),

    /// A queue was closed under the caller
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),

    /// A configured variant exists but has no implementation
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// One or more pipeline threads failed
    #[error(transparent)]
    Pipeline(#[from] PipelineFailure),

    /// Generic errors (wrapped anyhow)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SkeinError {
    /// The failure kind used in thread reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(_) => ErrorKind::Parse,
            Self::Serialize(_) => ErrorKind::Serialize,
            Self::Publish(_) => ErrorKind::Publish,
            Self::Receiver(_) => ErrorKind::Receiver,
            Self::QueueClosed(_) => ErrorKind::QueueClosed,
            Self::NotImplemented(_) => ErrorKind::NotImplemented,
            Self::Config(_) => ErrorKind::Config,
            Self::Pipeline(_) | Self::Other(_) => ErrorKind::Other,
        }
    }
}

/// JSON parse errors. Always scoped to a single item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Payload is not a single well-formed JSON value
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// Payload is JSON but does not fit the schema
    #[error("Schema mismatch: {0}")]
    Schema(String),

    /// Payload decoded into a number of rows other than one
    #[error("Expected exactly one record, found {0}")]
    RowCount(usize),
}

/// Errors raised while turning a columnar batch into a wire message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializeError {
    /// Accumulated batches could not be concatenated
    #[error("Combine failed: {0}")]
    Combine(String),

    /// The wire encoder failed
    #[error("Encode failed: {0}")]
    Encode(String),

    /// Encoded message is larger than the configured limit
    #[error("Message of {size} bytes exceeds limit of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },
}

/// Broker-side publish errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Failed to reach the broker
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Broker did not acknowledge in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Broker rejected the message
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Message is larger than the broker accepts
    #[error("Message of {size} bytes exceeds broker limit of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Client was closed before the publish
    #[error("Broker client closed")]
    Closed,
}

/// Input source errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReceiverError {
    /// Could not connect, or the connection dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// I/O error while reading
    #[error("I/O error: {0}")]
    Io(String),

    /// Framing or protocol violation
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for ReceiverError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::BrokenPipe
            | Io::AddrNotAvailable => Self::Connection(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

/// A queue has no peer left on the other side.
///
/// Consumers see this once the queue is empty and every producer is gone;
/// producers see it once every consumer is gone.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[error("Queue closed")]
pub struct QueueClosed;

/// Failure kind as reported per thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Serialize,
    Publish,
    Receiver,
    QueueClosed,
    NotImplemented,
    Config,
    /// Thread panicked
    Panic,
    /// Received and published counts disagree after shutdown
    DrainIncomplete,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parse => "ParseError",
            Self::Serialize => "SerializeError",
            Self::Publish => "PublishError",
            Self::Receiver => "ReceiverError",
            Self::QueueClosed => "QueueClosed",
            Self::NotImplemented => "NotImplemented",
            Self::Config => "ConfigError",
            Self::Panic => "Panic",
            Self::DrainIncomplete => "DrainIncomplete",
            Self::Other => "Error",
        };
        f.write_str(name)
    }
}

/// Role of a pipeline thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRole {
    Receiver,
    Drone,
    Publisher,
    Orchestrator,
}

impl fmt::Display for ThreadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Receiver => write!(f, "receiver"),
            Self::Drone => write!(f, "drone"),
            Self::Publisher => write!(f, "publisher"),
            Self::Orchestrator => write!(f, "orchestrator"),
        }
    }
}

/// One thread's fatal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadFailure {
    pub role: ThreadRole,
    pub index: usize,
    pub kind: ErrorKind,
    pub message: String,
}

impl ThreadFailure {
    pub fn new(role: ThreadRole, index: usize, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            role,
            index,
            kind,
            message: message.into(),
        }
    }

    /// Build a failure record from an error raised on a thread.
    pub fn from_error(role: ThreadRole, index: usize, error: &SkeinError) -> Self {
        Self::new(role, index, error.kind(), error.to_string())
    }

    /// Build a failure record from a panic payload returned by `join`.
    pub fn from_panic(
        role: ThreadRole,
        index: usize,
        payload: &(dyn std::any::Any + Send),
    ) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::new(role, index, ErrorKind::Panic, message)
    }
}

impl fmt::Display for ThreadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Thread: {}-{}, kind: {}, error: {}",
            self.role, self.index, self.kind, self.message
        )
    }
}

/// Aggregated report of every thread that failed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineFailure {
    failures: Vec<ThreadFailure>,
}

impl PipelineFailure {
    pub fn new(failures: Vec<ThreadFailure>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &[ThreadFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<ThreadFailure> {
        self.failures
    }

    /// Whether any thread failed with the given kind.
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.failures.iter().any(|f| f.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pipeline threads reported the following errors:")?;
        for failure in &self.failures {
            write!(f, "\n  {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PipelineFailure {}

/// Error classification for retry and shutdown decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Scoped to one item; drop it, count it, keep going
    ///
    /// Examples: malformed JSON, schema mismatch
    PerItem,

    /// May succeed when retried with backoff
    ///
    /// Examples: broker connection reset, publish timeout
    Transient,

    /// Stops the thread that raised it and shuts the pipeline down
    ///
    /// Examples: receiver failure, rejected publish, unsupported variant
    Fatal,

    /// Orderly shutdown signal, not a failure
    Shutdown,
}

/// Classifies an error to decide between dropping, retrying and aborting.
pub fn classify_error(error: &SkeinError) -> ErrorCategory {
    match error {
        SkeinError::Parse(_) => ErrorCategory::PerItem,
        SkeinError::Serialize(e) => classify_serialize_error(e),
        SkeinError::Publish(e) => classify_publish_error(e),
        SkeinError::Receiver(_) => ErrorCategory::Fatal,
        SkeinError::QueueClosed(_) => ErrorCategory::Shutdown,
        SkeinError::NotImplemented(_) | SkeinError::Config(_) => ErrorCategory::Fatal,
        SkeinError::Pipeline(_) | SkeinError::Other(_) => ErrorCategory::Fatal,
    }
}

/// Classifies a publish error on its own.
pub fn classify_publish_error(error: &PublishError) -> ErrorCategory {
    match error {
        PublishError::Connection(_) => ErrorCategory::Transient,
        PublishError::Timeout(_) => ErrorCategory::Transient,
        PublishError::Rejected(_) => ErrorCategory::Fatal,
        PublishError::MessageTooLarge { .. } => ErrorCategory::Fatal,
        PublishError::Closed => ErrorCategory::Fatal,
    }
}

fn classify_serialize_error(error: &SerializeError) -> ErrorCategory {
    // Drones split oversized batches, so `MessageTooLarge` only reaches here
    // for a single row that fits in no message.
    match error {
        SerializeError::MessageTooLarge { .. }
        | SerializeError::Combine(_)
        | SerializeError::Encode(_) => ErrorCategory::Fatal,
    }
}

/// Result type alias using SkeinError.
pub type Result<T> = std::result::Result<T, SkeinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification_parse_is_per_item() {
        let error = SkeinError::Parse(ParseError::InvalidJson("eof".to_string()));
        assert_eq!(classify_error(&error), ErrorCategory::PerItem);
    }

    #[test]
    fn test_error_classification_publish() {
        let transient = SkeinError::Publish(PublishError::Connection("reset".to_string()));
        assert_eq!(classify_error(&transient), ErrorCategory::Transient);

        let fatal = SkeinError::Publish(PublishError::Rejected("schema".to_string()));
        assert_eq!(classify_error(&fatal), ErrorCategory::Fatal);
    }

    #[test]
    fn test_error_classification_oversized_row_is_fatal() {
        let error = SkeinError::Serialize(SerializeError::MessageTooLarge { size: 900, max: 64 });
        assert_eq!(classify_error(&error), ErrorCategory::Fatal);
        assert_eq!(error.kind(), ErrorKind::Serialize);
    }

    #[test]
    fn test_error_classification_queue_closed_is_shutdown() {
        let error = SkeinError::from(QueueClosed);
        assert_eq!(classify_error(&error), ErrorCategory::Shutdown);
    }

    #[test]
    fn test_error_kind_names() {
        let error = SkeinError::Receiver(ReceiverError::Connection("refused".to_string()));
        assert_eq!(error.kind(), ErrorKind::Receiver);
        assert_eq!(error.kind().to_string(), "ReceiverError");
        assert_eq!(ErrorKind::Publish.to_string(), "PublishError");
    }

    #[test]
    fn test_io_error_mapping() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(ReceiverError::from(reset), ReceiverError::Connection(_)));

        let other = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad utf8");
        assert!(matches!(ReceiverError::from(other), ReceiverError::Io(_)));
    }

    #[test]
    fn test_pipeline_failure_display_lists_threads() {
        let failure = PipelineFailure::new(vec![
            ThreadFailure::new(
                ThreadRole::Receiver,
                0,
                ErrorKind::Receiver,
                "connection reset",
            ),
            ThreadFailure::new(ThreadRole::Drone, 3, ErrorKind::Panic, "boom"),
        ]);

        let text = SkeinError::from(failure.clone()).to_string();
        assert!(text.contains("Thread: receiver-0, kind: ReceiverError, error: connection reset"));
        assert!(text.contains("Thread: drone-3, kind: Panic, error: boom"));
        assert!(failure.has_kind(ErrorKind::Receiver));
        assert!(!failure.has_kind(ErrorKind::Publish));
    }

    #[test]
    fn test_thread_failure_from_panic_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("worker exploded");
        let failure = ThreadFailure::from_panic(ThreadRole::Drone, 1, payload.as_ref());
        assert_eq!(failure.kind, ErrorKind::Panic);
        assert_eq!(failure.message, "worker exploded");
    }
}
