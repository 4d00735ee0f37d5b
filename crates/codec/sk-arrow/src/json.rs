//! JSON line rendering of Arrow batches.

use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow_json::LineDelimitedWriter;
use std::io::Write;

/// Writes every row of `batch` to `out` as one JSON object per line.
pub fn write_json_rows<W: Write>(out: W, batch: &RecordBatch) -> Result<(), ArrowError> {
    let mut writer = LineDelimitedWriter::new(out);
    writer.write(batch)?;
    writer.finish()
}
