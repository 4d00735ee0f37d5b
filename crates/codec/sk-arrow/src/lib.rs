//! sk-arrow - Arrow codecs for skein.
//!
//! - [`ArrowJsonParser`] decodes one JSON object into a single-row batch
//!   using `arrow_json`
//! - [`IpcSerializer`] encodes a batch as an Arrow IPC stream (schema, one
//!   record batch, end-of-stream marker), so every message is self-describing
//! - [`decode_message`] reads such a message back
//! - [`write_json_rows`] renders batches as JSON lines

mod json;
mod parser;
mod serializer;

pub use json::write_json_rows;
pub use parser::ArrowJsonParser;
pub use serializer::{decode_message, IpcSerializer, IPC_STREAM_FORMAT};
