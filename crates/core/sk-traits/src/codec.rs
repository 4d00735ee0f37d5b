//! Parser and serializer traits.

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use sk_error::{ParseError, SerializeError};
use sk_types::ColumnarBatch;

/// Turns one JSON payload into one Arrow row.
///
/// Shared by every drone through an `Arc`, so implementations keep no
/// per-call state.
pub trait Parser: Send + Sync {
    /// Schema of the rows this parser produces.
    fn schema(&self) -> SchemaRef;

    /// Parses `payload` into a single-row batch matching [`schema`](Parser::schema).
    ///
    /// A payload that is not exactly one JSON object fitting the schema is
    /// rejected with [`ParseError`].
    fn parse(&self, payload: &[u8]) -> Result<RecordBatch, ParseError>;
}

/// Encodes a finished batch into a self-describing wire message.
///
/// The encoding must round-trip the row count and every column value.
pub trait Serializer: Send + Sync {
    fn serialize(&self, batch: &ColumnarBatch) -> Result<Bytes, SerializeError>;

    /// Name of the wire format, for logs.
    fn format(&self) -> &'static str;
}
