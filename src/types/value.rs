//! Open-ended metadata values.
//!
//! `MetaValue` is the tagged union carried by `Node::meta`, `Edge::meta` and
//! inline content payloads. Storage never interprets it; it only has to
//! survive an encode/decode pass through JSON text or a JSONB column.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key -> value metadata map.
///
/// A `BTreeMap` keeps the serialized form stable, which matters for the
/// relational backends where serialized meta is also a search target.
pub type Meta = BTreeMap<String, MetaValue>;

/// A heterogeneous metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "serde_json::Value", try_from = "serde_json::Value")]
pub enum MetaValue {
    /// JSON null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list of values.
    Array(Vec<MetaValue>),
    /// Nested map.
    Map(Meta),
}

/// Error decoding a JSON value into a [`MetaValue`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetaValueError {
    /// The number fits neither `i64` nor `f64`.
    #[error("unrepresentable number: {0}")]
    UnrepresentableNumber(String),
}

impl MetaValue {
    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value is a scalar (not an array or map).
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Array(_) | Self::Map(_))
    }

    /// Encode to a `serde_json::Value`.
    pub fn to_json(&self) -> serde_json::Value {
        self.clone().into()
    }

    /// Decode from a `serde_json::Value`.
    pub fn from_json(value: serde_json::Value) -> Result<Self, MetaValueError> {
        Self::try_from(value)
    }
}

impl From<MetaValue> for serde_json::Value {
    fn from(value: MetaValue) -> Self {
        match value {
            MetaValue::Null => serde_json::Value::Null,
            MetaValue::Bool(b) => serde_json::Value::Bool(b),
            MetaValue::Int(i) => serde_json::Value::from(i),
            // Non-finite floats have no JSON form
            MetaValue::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            MetaValue::String(s) => serde_json::Value::String(s),
            MetaValue::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            MetaValue::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl TryFrom<serde_json::Value> for MetaValue {
    type Error = MetaValueError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        Ok(match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    return Err(MetaValueError::UnrepresentableNumber(n.to_string()));
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::Array(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| Ok((k, Self::try_from(v)?)))
                    .collect::<Result<_, MetaValueError>>()?,
            ),
        })
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for MetaValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<Vec<MetaValue>> for MetaValue {
    fn from(items: Vec<MetaValue>) -> Self {
        Self::Array(items)
    }
}

impl From<Meta> for MetaValue {
    fn from(map: Meta) -> Self {
        Self::Map(map)
    }
}
