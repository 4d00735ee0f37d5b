//! Core types for skein.
//!
//! This crate provides the foundational types used throughout the pipeline:
//! - [`RawItem`] - One received JSON record with its sequence number
//! - [`ColumnarBatch`] - Arrow RecordBatch wrapper with sequence tracking
//! - [`SerializedMessage`] - Immutable wire message handed to the broker
//! - [`PipelineConfig`] - Read-only configuration snapshot for a run
//! - [`SchemaSpec`] - Declarative schema for incoming records
//! - [`PipelineProgress`] - Shared live counters observed by the orchestrator

pub mod batch;
pub mod config;
pub mod item;
pub mod progress;
pub mod schema;

pub use batch::*;
pub use config::*;
pub use item::*;
pub use progress::*;
pub use schema::*;
