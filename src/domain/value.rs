// Replicated state values. Objects use a BTreeMap so keys serialize in
// ASCII order, which keeps diff output and wire bytes deterministic.

use std::collections::BTreeMap;

/// Top-level replicated view: field name to value.
pub type ValueMap = BTreeMap<String, SnapshotValue>;

/// A recursive replicated value.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<SnapshotValue>),
    Object(BTreeMap<String, SnapshotValue>),
}

impl SnapshotValue {
    pub fn as_object(&self) -> Option<&BTreeMap<String, SnapshotValue>> {
        match self {
            SnapshotValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, SnapshotValue>> {
        match self {
            SnapshotValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => SnapshotValue::Null,
            serde_json::Value::Bool(b) => SnapshotValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SnapshotValue::Int(i)
                } else {
                    SnapshotValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => SnapshotValue::Str(s),
            serde_json::Value::Array(items) => {
                SnapshotValue::Array(items.into_iter().map(SnapshotValue::from_json).collect())
            }
            serde_json::Value::Object(map) => SnapshotValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, SnapshotValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SnapshotValue::Null => serde_json::Value::Null,
            SnapshotValue::Bool(b) => serde_json::Value::Bool(*b),
            SnapshotValue::Int(i) => serde_json::Value::from(*i),
            SnapshotValue::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            SnapshotValue::Str(s) => serde_json::Value::String(s.clone()),
            SnapshotValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(SnapshotValue::to_json).collect())
            }
            SnapshotValue::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<bool> for SnapshotValue {
    fn from(value: bool) -> Self {
        SnapshotValue::Bool(value)
    }
}

impl From<i64> for SnapshotValue {
    fn from(value: i64) -> Self {
        SnapshotValue::Int(value)
    }
}

impl From<f64> for SnapshotValue {
    fn from(value: f64) -> Self {
        SnapshotValue::Float(value)
    }
}

impl From<&str> for SnapshotValue {
    fn from(value: &str) -> Self {
        SnapshotValue::Str(value.to_string())
    }
}

impl From<String> for SnapshotValue {
    fn from(value: String) -> Self {
        SnapshotValue::Str(value)
    }
}
