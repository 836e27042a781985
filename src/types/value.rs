//! Dynamically typed task variable values.
//!
//! Task variables, command inputs, and protocol outputs are all loosely
//! typed JSON documents. [`VarValue`] keeps integers and floats distinct so
//! the overlay and codec layers can decide coercions per concrete type
//! instead of sniffing an untyped container.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A string-keyed bag of [`VarValue`]s, the shape of command inputs and
/// outputs.
pub type VarMap = HashMap<String, VarValue>;

/// A dynamically typed value as exchanged with the workflow engine and the
/// protocol handlers.
///
/// Serialized transparently: `VarValue::Int(7)` is the JSON number `7`, not
/// a tagged object. Deserialization keeps integral JSON numbers as
/// [`VarValue::Int`] and everything else numeric as [`VarValue::Float`].
///
/// # Examples
///
/// ```
/// use taskbridge::types::value::VarValue;
///
/// let v: VarValue = serde_json::from_str("{\"level\": 3}").unwrap();
/// match v {
///     VarValue::Map(m) => assert_eq!(m["level"], VarValue::Int(3)),
///     other => panic!("expected map, got {}", other.type_name()),
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    /// JSON `null`.
    Null,
    /// A boolean.
    Bool(bool),
    /// An integer (JSON numbers without a fractional part).
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// An ordered sequence of values.
    Seq(Vec<VarValue>),
    /// A string-keyed mapping.
    Map(VarMap),
}

impl VarValue {
    /// Human-readable name of the value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Seq(_) => "sequence",
            Self::Map(_) => "mapping",
        }
    }

    /// Returns the contained string, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for VarValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n.as_i64().map_or_else(
                || Self::Float(n.as_f64().unwrap_or_default()),
                Self::Int,
            ),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Seq(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(entries) => Self::Map(
                entries.into_iter().map(|(k, v)| (k, Self::from(v))).collect(),
            ),
        }
    }
}

impl From<VarValue> for serde_json::Value {
    fn from(value: VarValue) -> Self {
        match value {
            VarValue::Null => Self::Null,
            VarValue::Bool(b) => Self::Bool(b),
            VarValue::Int(i) => Self::Number(i.into()),
            VarValue::Float(f) => {
                serde_json::Number::from_f64(f).map_or(Self::Null, Self::Number)
            }
            VarValue::String(s) => Self::String(s),
            VarValue::Seq(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            VarValue::Map(entries) => Self::Object(
                entries.into_iter().map(|(k, v)| (k, Self::from(v))).collect(),
            ),
        }
    }
}

/// Parses the boolean spellings accepted in process definitions.
pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" | "True" | "TRUE" | "t" | "T" | "1" => Some(true),
        "false" | "False" | "FALSE" | "f" | "F" | "0" => Some(false),
        _ => None,
    }
}
