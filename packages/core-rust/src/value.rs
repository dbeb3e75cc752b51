//! Dynamic document values.
//!
//! [`Value`] is the schema-agnostic representation of user data: a tree of
//! plain records (string-keyed maps) over opaque leaves. Only [`Value::Object`]
//! is an interior node from the CRDT engine's point of view -- arrays,
//! primitives, and `null` are atomic leaves, overwritten as a whole.
//!
//! The serde encoding is untagged, so a `Value` serializes to plain JSON and
//! any JSON document deserializes back. [`to_value`] and [`from_value`] bridge
//! between domain types and this representation; they are the seam that lets a
//! store be typed over ordinary derive-serialized structs.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A JSON-compatible document value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// The explicit null value. A field set to null is still a write.
    Null,
    /// Boolean leaf.
    Bool(bool),
    /// Integer leaf.
    Int(i64),
    /// Floating-point leaf.
    Float(f64),
    /// String leaf.
    String(String),
    /// Array leaf. Elements are not merged individually.
    Array(Vec<Value>),
    /// Plain record: the only interior node.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Whether this value is a plain record (an interior node).
    #[must_use]
    pub fn is_record(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Looks up a field when this value is a record.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.get(key),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(flag) => Value::Bool(flag),
            serde_json::Value::Number(number) => number
                .as_i64()
                .map_or_else(|| Value::Float(number.as_f64().unwrap_or(f64::NAN)), Value::Int),
            serde_json::Value::String(text) => Value::String(text),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, value.into()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(flag) => serde_json::Value::Bool(flag),
            Value::Int(number) => serde_json::Value::from(number),
            Value::Float(number) => {
                serde_json::Number::from_f64(number).map_or(serde_json::Value::Null, Into::into)
            }
            Value::String(text) => serde_json::Value::String(text),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, value.into()))
                    .collect(),
            ),
        }
    }
}

/// Converts any serializable domain value into a [`Value`] tree.
///
/// # Errors
///
/// Returns the underlying serializer error when `value` cannot be represented
/// as JSON-compatible data (e.g. a map with non-string keys).
pub fn to_value<T: Serialize>(value: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(value).map(Into::into)
}

/// Converts a [`Value`] tree back into a domain type.
///
/// # Errors
///
/// Returns the underlying deserializer error when the tree does not match the
/// target type's shape.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        name: String,
        age: i64,
        active: bool,
    }

    #[test]
    fn serializes_as_plain_json() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Value::String("Alice".to_string()));
        fields.insert("age".to_string(), Value::Int(30));
        fields.insert(
            "tags".to_string(),
            Value::Array(vec![Value::String("a".to_string()), Value::Null]),
        );
        let json = serde_json::to_string(&Value::Object(fields)).unwrap();
        assert_eq!(json, r#"{"age":30,"name":"Alice","tags":["a",null]}"#);
    }

    #[test]
    fn deserializes_numbers_by_shape() {
        let value: Value = serde_json::from_str("3").unwrap();
        assert_eq!(value, Value::Int(3));
        let value: Value = serde_json::from_str("3.5").unwrap();
        assert_eq!(value, Value::Float(3.5));
    }

    #[test]
    fn json_value_conversion_roundtrip() {
        let original = serde_json::json!({
            "name": "Bob",
            "scores": [1, 2.5, null],
            "nested": { "deep": { "flag": true } }
        });
        let value: Value = original.clone().into();
        let back: serde_json::Value = value.into();
        assert_eq!(back, original);
    }

    #[test]
    fn typed_bridge_roundtrip() {
        let account = Account {
            name: "Carol".to_string(),
            age: 41,
            active: true,
        };
        let value = to_value(&account).unwrap();
        assert!(value.is_record());
        assert_eq!(value.get("age"), Some(&Value::Int(41)));
        let back: Account = from_value(value).unwrap();
        assert_eq!(back, account);
    }

    #[test]
    fn from_value_rejects_wrong_shape() {
        let result: Result<Account, _> = from_value(Value::String("nope".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn get_on_non_record_is_none() {
        assert_eq!(Value::Int(1).get("anything"), None);
    }
}
