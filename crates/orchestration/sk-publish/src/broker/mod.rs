//! Broker client implementations.

mod memory;
mod stats;
mod stdout;

pub use memory::MemoryBroker;
pub use stats::{StatsBroker, StatsReport};
pub use stdout::StdoutBroker;

use sk_error::SkeinError;
use sk_traits::BrokerClient;
use sk_types::BrokerTarget;

/// Builds the broker client for a configured target.
///
/// Pulsar is recognised but has no client yet and yields
/// [`SkeinError::NotImplemented`].
pub fn create_broker(target: &BrokerTarget) -> Result<Box<dyn BrokerClient>, SkeinError> {
    match target {
        BrokerTarget::Stdout { mode } => Ok(Box::new(StdoutBroker::stdout(*mode))),
        BrokerTarget::Stats => Ok(Box::new(StatsBroker::new())),
        BrokerTarget::Pulsar { url, topic } => Err(SkeinError::NotImplemented(format!(
            "Pulsar broker client ({url}, topic {topic})"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sk_types::StdoutMode;

    #[test]
    fn test_create_supported_brokers() {
        let stats = create_broker(&BrokerTarget::Stats).unwrap();
        assert_eq!(stats.name(), "stats");

        let stdout = create_broker(&BrokerTarget::Stdout {
            mode: StdoutMode::Summary,
        })
        .unwrap();
        assert_eq!(stdout.name(), "stdout");
    }

    #[test]
    fn test_pulsar_is_not_implemented() {
        let err = create_broker(&BrokerTarget::default_pulsar()).err().unwrap();
        assert!(matches!(err, SkeinError::NotImplemented(_)));
        assert!(err.to_string().contains("persistent://public/default/skein"));
    }
}
