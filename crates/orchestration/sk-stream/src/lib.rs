//! sk-stream - Stream orchestrator for skein.
//!
//! Wires one receiver thread, a hive of conversion drones and one publish
//! worker together through two bounded queues, drives them through the
//! [`PipelineState`] machine and returns the merged [`AggregateStats`].
//!
//! ```text
//! receiver ──▶ input queue ──▶ drones (N) ──▶ output queue ──▶ publisher ──▶ broker
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sk_stream::run_pipeline;
//! use sk_types::{PipelineConfig, SchemaSpec, StreamProtocol};
//!
//! let config = PipelineConfig::new()
//!     .with_schema(SchemaSpec::parse_inline("id:int64,name:utf8?")?)
//!     .with_protocol(StreamProtocol::Stdin);
//! let stats = run_pipeline(config)?;
//! println!("published {} rows", stats.rows_published());
//! # Ok::<(), sk_error::SkeinError>(())
//! ```

pub mod orchestrator;
pub mod receiver;
pub mod report;
pub mod state;

pub use orchestrator::{run_pipeline, StreamOrchestrator};
pub use receiver::{create_receiver, LineReceiver, TcpReceiver};
pub use report::{write_latency_csv, AggregateStats, StatsRecord};
pub use state::{PipelineState, StateHandle};
