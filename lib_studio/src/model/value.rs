//! # Structured Values
//!
//! Every decoded message payload is expressed as a `StructuredValue`, a tagged
//! recursive tree. The evaluator and the panels only ever look at this type, so
//! the decoding layer (CDR, protobuf, JSON...) stays an external concern.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// A decoded message field, or a whole decoded message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum StructuredValue {
    /// An explicitly absent value (JSON `null`).
    Null,
    /// A boolean field.
    Bool(bool),
    /// A signed or unsigned integer field that fits in 64 bits.
    Int(i64),
    /// A floating point field.
    Float(f64),
    /// A string field.
    String(String),
    /// An opaque byte blob (`uint8[]` in most robotics IDLs).
    Bytes(Vec<u8>),
    /// An array / sequence field.
    Sequence(Vec<StructuredValue>),
    /// A nested structure, keyed by field name.
    Mapping(BTreeMap<String, StructuredValue>),
}

/// Parses a numeric string. "NaN" and the infinities stay text.
pub(crate) fn parse_finite(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|x| x.is_finite())
}

impl StructuredValue {
    /// Looks up a named field on a mapping. Any other variant yields `None`.
    pub fn field(&self, name: &str) -> Option<&StructuredValue> {
        match self {
            StructuredValue::Mapping(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Walks a dotted list of field names.
    pub fn field_path<'a, I>(&self, names: I) -> Option<&StructuredValue>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names.into_iter().try_fold(self, |value, name| value.field(name))
    }

    /// Number of addressable elements when this value is used as an array.
    ///
    /// `Bytes` behave like a sequence of integers so that slices work on them.
    pub fn array_len(&self) -> Option<usize> {
        match self {
            StructuredValue::Sequence(items) => Some(items.len()),
            StructuredValue::Bytes(bytes) => Some(bytes.len()),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[StructuredValue]> {
        match self {
            StructuredValue::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StructuredValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value. Strings that parse as numbers count.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StructuredValue::Int(i) => Some(*i as f64),
            StructuredValue::Float(f) => Some(*f),
            StructuredValue::String(s) => parse_finite(s),
            _ => None,
        }
    }

    /// Leaf values are everything that is neither a sequence nor a mapping.
    pub fn is_leaf(&self) -> bool {
        !matches!(self, StructuredValue::Sequence(_) | StructuredValue::Mapping(_))
    }

    /// Short type label, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            StructuredValue::Null => "null",
            StructuredValue::Bool(_) => "bool",
            StructuredValue::Int(_) => "int",
            StructuredValue::Float(_) => "float",
            StructuredValue::String(_) => "string",
            StructuredValue::Bytes(_) => "bytes",
            StructuredValue::Sequence(_) => "sequence",
            StructuredValue::Mapping(_) => "mapping",
        }
    }

    /// Builds a mapping from `(name, value)` pairs.
    pub fn mapping<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, StructuredValue)>,
    {
        StructuredValue::Mapping(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Rough in-memory footprint, used by the ingest buffer accounting.
    pub fn approximate_size(&self) -> usize {
        match self {
            StructuredValue::Null | StructuredValue::Bool(_) => 1,
            StructuredValue::Int(_) | StructuredValue::Float(_) => 8,
            StructuredValue::String(s) => s.len(),
            StructuredValue::Bytes(b) => b.len(),
            StructuredValue::Sequence(items) => items.iter().map(Self::approximate_size).sum(),
            StructuredValue::Mapping(fields) => fields
                .iter()
                .map(|(k, v)| k.len() + v.approximate_size())
                .sum(),
        }
    }

    /// Converts into a `serde_json::Value` for display and for service payloads.
    pub fn to_json(&self) -> Value {
        Value::from(self.clone())
    }
}

impl From<Value> for StructuredValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => StructuredValue::Null,
            Value::Bool(b) => StructuredValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => StructuredValue::Int(i),
                None => StructuredValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => StructuredValue::String(s),
            Value::Array(items) => {
                StructuredValue::Sequence(items.into_iter().map(StructuredValue::from).collect())
            }
            Value::Object(map) => StructuredValue::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, StructuredValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<StructuredValue> for Value {
    fn from(value: StructuredValue) -> Self {
        match value {
            StructuredValue::Null => Value::Null,
            StructuredValue::Bool(b) => Value::Bool(b),
            StructuredValue::Int(i) => Value::Number(i.into()),
            StructuredValue::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            StructuredValue::String(s) => Value::String(s),
            StructuredValue::Bytes(bytes) => {
                Value::Array(bytes.into_iter().map(|b| Value::Number(b.into())).collect())
            }
            StructuredValue::Sequence(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            StructuredValue::Mapping(fields) => {
                let mut map = Map::with_capacity(fields.len());
                for (k, v) in fields {
                    map.insert(k, Value::from(v));
                }
                Value::Object(map)
            }
        }
    }
}

impl From<bool> for StructuredValue {
    fn from(value: bool) -> Self {
        StructuredValue::Bool(value)
    }
}

impl From<i64> for StructuredValue {
    fn from(value: i64) -> Self {
        StructuredValue::Int(value)
    }
}

impl From<f64> for StructuredValue {
    fn from(value: f64) -> Self {
        StructuredValue::Float(value)
    }
}

impl From<&str> for StructuredValue {
    fn from(value: &str) -> Self {
        StructuredValue::String(value.to_string())
    }
}

impl From<String> for StructuredValue {
    fn from(value: String) -> Self {
        StructuredValue::String(value)
    }
}

impl From<Vec<StructuredValue>> for StructuredValue {
    fn from(value: Vec<StructuredValue>) -> Self {
        StructuredValue::Sequence(value)
    }
}

impl fmt::Display for StructuredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuredValue::String(s) => f.write_str(s),
            StructuredValue::Int(i) => write!(f, "{}", i),
            StructuredValue::Float(x) => write!(f, "{}", x),
            StructuredValue::Bool(b) => write!(f, "{}", b),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_from_json_preserving_integers() {
        let value = StructuredValue::from(json!({"a": 1, "b": 1.5, "c": [true, "x"]}));
        assert_eq!(value.field("a"), Some(&StructuredValue::Int(1)));
        assert_eq!(value.field("b"), Some(&StructuredValue::Float(1.5)));
        assert_eq!(value.field("c").and_then(|c| c.array_len()), Some(2));
    }

    #[test]
    fn numeric_view_accepts_numeric_strings() {
        assert_eq!(StructuredValue::from("5").as_f64(), Some(5.0));
        assert_eq!(StructuredValue::from(" 2.5 ").as_f64(), Some(2.5));
        assert_eq!(StructuredValue::from("five").as_f64(), None);
        assert_eq!(StructuredValue::Bool(true).as_f64(), None);
        for word in ["NaN", "inf", "-infinity", "Infinity"] {
            assert_eq!(StructuredValue::from(word).as_f64(), None, "{}", word);
        }
        assert_eq!(StructuredValue::from("1e400").as_f64(), None);
    }

    #[test]
    fn field_path_walks_nested_mappings() {
        let value = StructuredValue::from(json!({"pose": {"position": {"x": 3}}}));
        assert_eq!(
            value.field_path(["pose", "position", "x"]),
            Some(&StructuredValue::Int(3))
        );
        assert_eq!(value.field_path(["pose", "orientation"]), None);
    }
}
