//! sk-publish - Publish stage of skein.
//!
//! A single [`PublishWorker`] drains the output queue into a
//! [`BrokerClient`](sk_traits::BrokerClient), counting what the broker took
//! and, optionally, sampling end-to-end latency per message.
//!
//! Broker clients shipped here:
//! - [`StdoutBroker`] - prints rows as JSON lines, or one summary per message
//! - [`StatsBroker`] - counts and discards
//! - [`MemoryBroker`] - keeps every message, with optional failure injection

pub mod broker;
pub mod stats;
pub mod worker;

pub use broker::{create_broker, MemoryBroker, StatsBroker, StatsReport, StdoutBroker};
pub use stats::{LatencySample, LatencySummary, PublishStats};
pub use worker::{PublishOutcome, PublishWorker};
