//! sk-convert - JSON to Arrow conversion stage of skein.
//!
//! A [`ConversionHive`] runs a fixed pool of [`ConversionWorker`] threads
//! ("drones"). Every drone pops raw items from the shared input queue, feeds
//! its own [`BatchBuilder`](sk_accumulator::BatchBuilder) and pushes finished
//! messages to the shared output queue. Drones share nothing else; their
//! [`DroneOutcome`] (stats and any serialize error) comes back through the
//! join handle and is merged by [`ConversionHive::join`].

pub mod drone;
pub mod hive;
pub mod stats;

pub use drone::{ConversionWorker, DroneOutcome, DroneSettings};
pub use hive::{ConversionHive, DroneReport, HiveReport};
pub use stats::ConversionStats;
