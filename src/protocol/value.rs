//! Untyped payload values carried in a message's `data` map.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{TransportError, TransportResult, ValueErrorKind};

/// Ordered key/value mapping used for message payloads and nested objects.
pub type Object = IndexMap<String, Value>;

/// A payload value: a scalar, a nested object, or a list.
///
/// Serialized untagged, so every variant maps directly onto its JSON
/// counterpart. Object key order is preserved through encode and decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Object(Object),
}

impl Value {
    /// Name of the variant, used in type mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> TransportResult<&str> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_i64(&self) -> TransportResult<i64> {
        match self {
            Value::Integer(n) => Ok(*n),
            other => Err(other.mismatch("integer")),
        }
    }

    /// Read a number as `f64`. Integers are widened.
    pub fn as_f64(&self) -> TransportResult<f64> {
        match self {
            Value::Float(n) => Ok(*n),
            Value::Integer(n) => Ok(*n as f64),
            other => Err(other.mismatch("float")),
        }
    }

    pub fn as_bool(&self) -> TransportResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_list(&self) -> TransportResult<&[Value]> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(other.mismatch("list")),
        }
    }

    pub fn as_object(&self) -> TransportResult<&Object> {
        match self {
            Value::Object(map) => Ok(map),
            other => Err(other.mismatch("object")),
        }
    }

    /// Look up `key` in an object value.
    pub fn get(&self, key: &str) -> TransportResult<&Value> {
        self.as_object()?
            .get(key)
            .ok_or_else(|| missing_key(key))
    }

    /// Decode this value into a domain type.
    ///
    /// This is how handlers turn a flattened entity record in `data` into
    /// a typed struct. Shape errors surface as `Serialization` errors.
    pub fn decode<T: DeserializeOwned>(&self) -> TransportResult<T> {
        let text = serde_json::to_string(self)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Encode a domain type as a payload value, keeping field order.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> TransportResult<Value> {
        let text = serde_json::to_string(value)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// True if this value, or anything nested in it, is a NaN or infinite float.
    pub(crate) fn contains_non_finite(&self) -> bool {
        match self {
            Value::Float(n) => !n.is_finite(),
            Value::List(items) => items.iter().any(Value::contains_non_finite),
            Value::Object(map) => map.values().any(Value::contains_non_finite),
            _ => false,
        }
    }

    /// Nesting depth: 0 for scalars, 1 + the deepest child for lists and objects.
    pub(crate) fn depth(&self) -> usize {
        match self {
            Value::List(items) => 1 + items.iter().map(Value::depth).max().unwrap_or(0),
            Value::Object(map) => 1 + map.values().map(Value::depth).max().unwrap_or(0),
            _ => 0,
        }
    }

    fn mismatch(&self, expected: &'static str) -> TransportError {
        TransportError::Value {
            kind: ValueErrorKind::TypeMismatch {
                expected,
                found: self.type_name(),
            },
        }
    }
}

pub(crate) fn missing_key(key: &str) -> TransportError {
    TransportError::Value {
        kind: ValueErrorKind::MissingKey {
            key: key.to_string(),
        },
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Value::Object(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Integer(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}
