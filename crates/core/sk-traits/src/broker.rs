//! Broker client trait.

use sk_error::PublishError;
use sk_types::SerializedMessage;

/// Destination for serialized messages.
///
/// Owned by the single publish worker thread, hence `&mut self` and no
/// `Sync` bound.
///
/// # Implementations
///
/// - Stdout broker: prints rows or one summary line per message
/// - Stats broker: counts and discards
/// - Memory broker: keeps payloads, for tests
pub trait BrokerClient: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Publishes one message. Returns once the broker has taken it.
    fn publish(&mut self, message: &SerializedMessage) -> Result<(), PublishError>;

    /// Flushes and releases the client. Called once, after the last publish.
    fn close(&mut self) -> Result<(), PublishError> {
        Ok(())
    }
}
