//! Arrow IPC stream encoding of finished batches.

use arrow::compute::concat_batches;
use arrow::error::ArrowError;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use sk_error::SerializeError;
use sk_traits::Serializer;
use sk_types::ColumnarBatch;
use std::io::Cursor;
use tracing::trace;

/// Name reported by [`IpcSerializer::format`](Serializer::format).
pub const IPC_STREAM_FORMAT: &str = "arrow-ipc-stream";

/// Encodes batches as standalone Arrow IPC streams.
#[derive(Debug, Clone, Default)]
pub struct IpcSerializer {
    max_message_bytes: Option<usize>,
}

impl IpcSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject encoded messages larger than `max` bytes.
    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = Some(max);
        self
    }
}

impl Serializer for IpcSerializer {
    fn serialize(&self, batch: &ColumnarBatch) -> Result<Bytes, SerializeError> {
        let record_batch = batch.record_batch();
        let mut buffer = Vec::with_capacity(record_batch.get_array_memory_size());
        {
            let mut writer = StreamWriter::try_new(&mut buffer, &record_batch.schema())
                .map_err(encode_error)?;
            writer.write(record_batch).map_err(encode_error)?;
            writer.finish().map_err(encode_error)?;
        }

        if let Some(max) = self.max_message_bytes {
            if buffer.len() > max {
                return Err(SerializeError::MessageTooLarge {
                    size: buffer.len(),
                    max,
                });
            }
        }

        trace!(
            rows = record_batch.num_rows(),
            bytes = buffer.len(),
            "Serialized batch"
        );
        Ok(Bytes::from(buffer))
    }

    fn format(&self) -> &'static str {
        IPC_STREAM_FORMAT
    }
}

fn encode_error(e: ArrowError) -> SerializeError {
    SerializeError::Encode(e.to_string())
}

/// Reads a message produced by [`IpcSerializer`] back into one batch.
pub fn decode_message(payload: &[u8]) -> Result<RecordBatch, ArrowError> {
    let reader = StreamReader::try_new(Cursor::new(payload), None)?;
    let schema = reader.schema();
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    concat_batches(&schema, &batches)
}
