//! Declarative schema for incoming JSON records.
//!
//! Schemas come either from a YAML/JSON file:
//!
//! ```yaml
//! fields:
//!   - name: seq
//!     type: uint64
//!   - name: tags
//!     type: list<utf8>
//!     nullable: true
//! ```
//!
//! or from inline specs such as `seq:uint64,v:int64,note:utf8?`, where a
//! trailing `?` marks the field nullable.

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};
use sk_error::SkeinError;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Name of the optional column holding each row's sequence number.
pub const SEQ_COLUMN_NAME: &str = "ingest_seq";

/// Supported column types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    Boolean,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Utf8,
    List(Box<FieldType>),
}

impl FieldType {
    pub fn to_arrow(&self) -> DataType {
        match self {
            Self::Boolean => DataType::Boolean,
            Self::Int32 => DataType::Int32,
            Self::Int64 => DataType::Int64,
            Self::UInt32 => DataType::UInt32,
            Self::UInt64 => DataType::UInt64,
            Self::Float32 => DataType::Float32,
            Self::Float64 => DataType::Float64,
            Self::Utf8 => DataType::Utf8,
            Self::List(inner) => {
                DataType::List(Arc::new(Field::new("item", inner.to_arrow(), true)))
            }
        }
    }
}

impl FromStr for FieldType {
    type Err = SkeinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if let Some(inner) = s.strip_prefix("list<").and_then(|r| r.strip_suffix('>')) {
            return Ok(Self::List(Box::new(inner.parse()?)));
        }
        match s.as_str() {
            "bool" | "boolean" => Ok(Self::Boolean),
            "int32" | "i32" => Ok(Self::Int32),
            "int64" | "i64" => Ok(Self::Int64),
            "uint32" | "u32" => Ok(Self::UInt32),
            "uint64" | "u64" => Ok(Self::UInt64),
            "float32" | "f32" => Ok(Self::Float32),
            "float64" | "f64" | "double" => Ok(Self::Float64),
            "utf8" | "string" | "str" => Ok(Self::Utf8),
            other => Err(SkeinError::Config(format!("Unknown field type: {other}"))),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boolean => write!(f, "boolean"),
            Self::Int32 => write!(f, "int32"),
            Self::Int64 => write!(f, "int64"),
            Self::UInt32 => write!(f, "uint32"),
            Self::UInt64 => write!(f, "uint64"),
            Self::Float32 => write!(f, "float32"),
            Self::Float64 => write!(f, "float64"),
            Self::Utf8 => write!(f, "utf8"),
            Self::List(inner) => write!(f, "list<{inner}>"),
        }
    }
}

impl TryFrom<String> for FieldType {
    type Error = SkeinError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.to_string()
    }
}

/// One named column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub data_type: FieldType,

    #[serde(default)]
    pub nullable: bool,
}

impl FromStr for FieldSpec {
    type Err = SkeinError;

    /// Parses `name:type`, with a trailing `?` for nullable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, ty) = s
            .split_once(':')
            .ok_or_else(|| SkeinError::Config(format!("Field spec must be name:type, got '{s}'")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(SkeinError::Config(format!("Field spec has no name: '{s}'")));
        }
        let ty = ty.trim();
        let (ty, nullable) = match ty.strip_suffix('?') {
            Some(stripped) => (stripped, true),
            None => (ty, false),
        };
        Ok(Self {
            name: name.to_string(),
            data_type: ty.parse()?,
            nullable,
        })
    }
}

/// Schema of incoming records.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaSpec {
    pub fields: Vec<FieldSpec>,
}

impl SchemaSpec {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Parses a comma separated list of inline field specs.
    pub fn parse_inline(spec: &str) -> Result<Self, SkeinError> {
        let fields = spec
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(FieldSpec::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { fields })
    }

    /// Loads a schema file. YAML is a superset of JSON, so both work.
    pub fn from_path(path: &Path) -> Result<Self, SkeinError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SkeinError::Config(format!("Cannot read schema file {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&text).map_err(|e| {
            SkeinError::Config(format!("Invalid schema file {}: {e}", path.display()))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Validates field names are present and unique.
    pub fn validate(&self) -> Result<(), String> {
        if self.fields.is_empty() {
            return Err("schema has no fields".to_string());
        }
        for (i, field) in self.fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(format!("field {i} has an empty name"));
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(format!("duplicate field name '{}'", field.name));
            }
        }
        Ok(())
    }

    /// Builds the Arrow schema.
    pub fn to_arrow(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .fields
            .iter()
            .map(|f| Field::new(&f.name, f.data_type.to_arrow(), f.nullable))
            .collect();
        Arc::new(Schema::new(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inline() {
        let spec = SchemaSpec::parse_inline("seq:uint64, v:int64, note:utf8?").unwrap();
        assert_eq!(spec.fields.len(), 3);
        assert_eq!(spec.fields[0].data_type, FieldType::UInt64);
        assert!(!spec.fields[1].nullable);
        assert!(spec.fields[2].nullable);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_parse_list_type() {
        let ty: FieldType = "list<uint64>".parse().unwrap();
        assert_eq!(ty, FieldType::List(Box::new(FieldType::UInt64)));
        assert_eq!(ty.to_string(), "list<uint64>");
        assert!(matches!(ty.to_arrow(), DataType::List(_)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(SchemaSpec::parse_inline("seq").is_err());
        assert!(SchemaSpec::parse_inline("seq:decimal").is_err());
        assert!(SchemaSpec::parse_inline(":int64").is_err());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty() {
        assert!(SchemaSpec::default().validate().is_err());
        let dup = SchemaSpec::parse_inline("a:int64,a:utf8").unwrap();
        assert!(dup.validate().unwrap_err().contains("duplicate"));
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r#"
fields:
  - name: seq
    type: uint64
  - name: tags
    type: list<utf8>
    nullable: true
"#;
        let spec: SchemaSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.fields[1].data_type, FieldType::List(Box::new(FieldType::Utf8)));
        assert!(spec.fields[1].nullable);

        let schema = spec.to_arrow();
        assert_eq!(schema.field(0).name(), "seq");
        assert_eq!(schema.field(0).data_type(), &DataType::UInt64);
    }

    #[test]
    fn test_from_json_text() {
        let json = r#"{"fields":[{"name":"v","type":"int64"}]}"#;
        let spec: SchemaSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.fields[0].name, "v");
    }
}
