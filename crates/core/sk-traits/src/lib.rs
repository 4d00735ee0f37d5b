//! Collaborator traits for skein.
//!
//! The pipeline core only talks to its edges through these traits:
//! - [`Receiver`] - produces raw JSON items through an [`IngestHandle`]
//! - [`Parser`] - turns one JSON payload into one Arrow row
//! - [`Serializer`] - encodes a finished batch into a wire message
//! - [`BrokerClient`] - publishes wire messages

pub mod broker;
pub mod codec;
pub mod receiver;

pub use broker::*;
pub use codec::*;
pub use receiver::*;
