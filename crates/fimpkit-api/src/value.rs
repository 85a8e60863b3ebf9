// ── Typed envelope values ──
//
// The `val_t` tag on the wire selects how `val` is interpreted. `Value`
// keeps both together so a decoded envelope can never carry a value
// that disagrees with its tag.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::Error;

/// Wire tag for the envelope value (`val_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ValueType {
    Null,
    Bool,
    Int,
    Float,
    String,
    Object,
    BoolMap,
    IntMap,
    FloatMap,
    StrMap,
    BoolArray,
    IntArray,
    FloatArray,
    StrArray,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Parse a wire tag, reporting unknown tags as a typed error.
    pub fn from_tag(tag: &str) -> Result<Self, Error> {
        tag.parse()
            .map_err(|_| Error::UnknownValueType(tag.to_owned()))
    }
}

/// Envelope value, one variant per `val_t`.
///
/// Equality is structural: maps compare by content, objects by JSON tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Object(serde_json::Value),
    BoolMap(BTreeMap<String, bool>),
    IntMap(BTreeMap<String, i64>),
    FloatMap(BTreeMap<String, f64>),
    StrMap(BTreeMap<String, String>),
    BoolArray(Vec<bool>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    StrArray(Vec<String>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::Null,
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::String(_) => ValueType::String,
            Self::Object(_) => ValueType::Object,
            Self::BoolMap(_) => ValueType::BoolMap,
            Self::IntMap(_) => ValueType::IntMap,
            Self::FloatMap(_) => ValueType::FloatMap,
            Self::StrMap(_) => ValueType::StrMap,
            Self::BoolArray(_) => ValueType::BoolArray,
            Self::IntArray(_) => ValueType::IntArray,
            Self::FloatArray(_) => ValueType::FloatArray,
            Self::StrArray(_) => ValueType::StrArray,
        }
    }

    /// Build an object value from any serializable type.
    pub fn object<T: Serialize>(value: &T) -> Result<Self, Error> {
        Ok(Self::Object(serde_json::to_value(value)?))
    }

    /// Decode the raw `val` field according to its tag.
    pub fn from_json(value_type: ValueType, raw: serde_json::Value) -> Result<Self, Error> {
        let value = match value_type {
            // `val` is ignored for null envelopes; senders put anything there.
            ValueType::Null => Self::Null,
            ValueType::Bool => Self::Bool(decode(raw)?),
            ValueType::Int => Self::Int(decode(raw)?),
            ValueType::Float => Self::Float(decode(raw)?),
            ValueType::String => Self::String(decode(raw)?),
            ValueType::Object => Self::Object(raw),
            ValueType::BoolMap => Self::BoolMap(decode(raw)?),
            ValueType::IntMap => Self::IntMap(decode(raw)?),
            ValueType::FloatMap => Self::FloatMap(decode(raw)?),
            ValueType::StrMap => Self::StrMap(decode(raw)?),
            ValueType::BoolArray => Self::BoolArray(decode(raw)?),
            ValueType::IntArray => Self::IntArray(decode(raw)?),
            ValueType::FloatArray => Self::FloatArray(decode(raw)?),
            ValueType::StrArray => Self::StrArray(decode(raw)?),
        };
        Ok(value)
    }

    /// Encode into the raw `val` field.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;

        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(v) => json!(v),
            Self::Int(v) => json!(v),
            Self::Float(v) => json!(v),
            Self::String(v) => json!(v),
            Self::Object(v) => v.clone(),
            Self::BoolMap(v) => json!(v),
            Self::IntMap(v) => json!(v),
            Self::FloatMap(v) => json!(v),
            Self::StrMap(v) => json!(v),
            Self::BoolArray(v) => json!(v),
            Self::IntArray(v) => json!(v),
            Self::FloatArray(v) => json!(v),
            Self::StrArray(v) => json!(v),
        }
    }
}

fn decode<T: DeserializeOwned>(raw: serde_json::Value) -> Result<T, Error> {
    Ok(serde_json::from_value(raw)?)
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<BTreeMap<String, String>> for Value {
    fn from(v: BTreeMap<String, String>) -> Self {
        Self::StrMap(v)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tags_are_snake_case() {
        assert_eq!(ValueType::StrMap.as_str(), "str_map");
        assert_eq!(ValueType::from_tag("float_array").unwrap(), ValueType::FloatArray);
        assert!(matches!(
            ValueType::from_tag("decimal"),
            Err(Error::UnknownValueType(tag)) if tag == "decimal"
        ));
    }

    #[test]
    fn rejects_value_inconsistent_with_tag() {
        assert!(Value::from_json(ValueType::Int, json!("ten")).is_err());
        assert!(Value::from_json(ValueType::StrMap, json!({"a": 1})).is_err());
    }

    #[test]
    fn null_ignores_raw_value() {
        assert_eq!(Value::from_json(ValueType::Null, json!("x")).unwrap(), Value::Null);
    }

    #[test]
    fn object_equality_is_structural() {
        let a = Value::Object(json!({"a": [1, 2, {"b": true}]}));
        let b = Value::from_json(ValueType::Object, json!({"a": [1, 2, {"b": true}]})).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Value::Object(json!({"a": [1, 2]})));
    }
}
