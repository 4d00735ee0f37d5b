//! JSON to Arrow row decoding.

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow_json::ReaderBuilder;
use serde::de::IgnoredAny;
use sk_error::ParseError;
use sk_traits::Parser;
use sk_types::SchemaSpec;
use tracing::trace;

/// Parses single JSON objects against a fixed schema.
///
/// Payloads are first checked to be exactly one well-formed JSON value, so
/// truncated records and concatenated records are rejected before the Arrow
/// decoder sees them.
#[derive(Debug, Clone)]
pub struct ArrowJsonParser {
    schema: SchemaRef,
    strict: bool,
}

impl ArrowJsonParser {
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            strict: false,
        }
    }

    pub fn from_spec(spec: &SchemaSpec) -> Self {
        Self::new(spec.to_arrow())
    }

    /// Reject objects with fields outside the schema.
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

impl Parser for ArrowJsonParser {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn parse(&self, payload: &[u8]) -> Result<RecordBatch, ParseError> {
        let payload = payload.trim_ascii();
        if payload.is_empty() {
            return Err(ParseError::InvalidJson("empty payload".to_string()));
        }

        serde_json::from_slice::<IgnoredAny>(payload)
            .map_err(|e| ParseError::InvalidJson(e.to_string()))?;
        if payload[0] != b'{' {
            return Err(ParseError::Schema("expected a JSON object".to_string()));
        }

        let mut decoder = ReaderBuilder::new(self.schema.clone())
            .with_strict_mode(self.strict)
            .build_decoder()
            .map_err(|e| ParseError::Schema(e.to_string()))?;

        let consumed = decoder
            .decode(payload)
            .map_err(|e| ParseError::Schema(e.to_string()))?;
        if consumed != payload.len() {
            return Err(ParseError::InvalidJson(format!(
                "trailing data after byte {consumed}"
            )));
        }

        let batch = decoder
            .flush()
            .map_err(|e| ParseError::Schema(e.to_string()))?
            .ok_or(ParseError::RowCount(0))?;
        if batch.num_rows() != 1 {
            return Err(ParseError::RowCount(batch.num_rows()));
        }

        trace!(bytes = payload.len(), "Parsed record");
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int64Array, StringArray};

    fn parser() -> ArrowJsonParser {
        ArrowJsonParser::from_spec(&SchemaSpec::parse_inline("seq:int64,v:int64,note:utf8?").unwrap())
    }

    #[test]
    fn test_parse_single_object() {
        let batch = parser().parse(br#"{"seq":3,"v":4,"note":"hi"}"#).unwrap();
        assert_eq!(batch.num_rows(), 1);

        let v = batch
            .column(1)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(v.value(0), 4);
        let note = batch
            .column(2)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(note.value(0), "hi");
    }

    #[test]
    fn test_parse_missing_nullable_is_null() {
        let batch = parser().parse(b"  {\"seq\":0,\"v\":1}\n").unwrap();
        assert!(batch.column(2).is_null(0));
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        let err = parser().parse(br#"{"seq":0,"v":"#).unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson(_)));

        let err = parser().parse(b"").unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson(_)));
    }

    #[test]
    fn test_parse_rejects_multiple_records() {
        let err = parser()
            .parse(br#"{"seq":0,"v":1} {"seq":1,"v":2}"#)
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson(_)));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        let err = parser().parse(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, ParseError::Schema(_)));
    }

    #[test]
    fn test_parse_rejects_type_mismatch() {
        let err = parser().parse(br#"{"seq":0,"v":"abc"}"#).unwrap_err();
        assert!(matches!(err, ParseError::Schema(_)));
    }

    #[test]
    fn test_parse_rejects_missing_required_field() {
        assert!(parser().parse(br#"{"seq":0}"#).is_err());
    }

    #[test]
    fn test_strict_mode_rejects_unknown_fields() {
        let payload = br#"{"seq":0,"v":1,"extra":true}"#;
        assert!(parser().parse(payload).is_ok());
        assert!(parser().with_strict_mode(true).parse(payload).is_err());
    }
}
