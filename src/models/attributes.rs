//! Schema-less student attribute bag with typed read accessors.
//!
//! Attributes are stored as an open JSON object. Readers go through
//! [`StudentAttributes::field`], which yields a [`FieldValue`] only when the key
//! holds a usable value, so missing data is an explicit `None` branch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// A present, non-empty attribute value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Number(&'a Number),
    Bool(bool),
    /// Arrays and nested objects
    Structured(&'a Value),
}

impl FieldValue<'_> {
    /// Render the value the way it should appear in prose.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Text(s) => (*s).to_string(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Bool(true) => "yes".to_string(),
            FieldValue::Bool(false) => "no".to_string(),
            FieldValue::Structured(v) => v.to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => n.as_f64(),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Open attribute map attached to a student.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentAttributes(Map<String, Value>);

impl StudentAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed view of `key`. Null values and blank strings count as missing.
    pub fn field(&self, key: &str) -> Option<FieldValue<'_>> {
        match self.0.get(key)? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(FieldValue::Text(s.trim())),
            Value::Number(n) => Some(FieldValue::Number(n)),
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            other => Some(FieldValue::Structured(other)),
        }
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.field(key).map(|v| v.render())
    }

    /// First key in `keys` that holds a value.
    pub fn first_text(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.text(k))
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.field(key).and_then(|v| v.as_f64())
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Overlay `other` onto this map, key by key.
    pub fn merge(&mut self, other: &StudentAttributes) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

impl From<Map<String, Value>> for StudentAttributes {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
