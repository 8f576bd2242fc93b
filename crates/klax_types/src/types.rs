// Pin Types - The static side of the script type system
//
// Pins, variables and function parameters declare a PinType. The editor checks
// assignability when a connection is made; at runtime the only type test is the
// author-visible cast (`PinType::cast`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Pin Types
// ─────────────────────────────────────────────────────────────────────────────

/// Data types that can flow through value pins
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "PascalCase")]
pub enum PinType {
    /// Dynamic type, accepts anything
    #[default]
    Any,
    Bool,
    /// 64-bit signed integer
    Int,
    /// 64-bit floating point
    Float,
    String,
    /// Array of a specific element type
    Array { element: Box<PinType> },
    /// Script data record; an empty `type_id` accepts any record
    Object { type_id: String },
    /// Engine object reference; an empty `type_id` accepts any handle
    Handle { type_id: String },
}

impl PinType {
    pub fn array(element: PinType) -> Self {
        PinType::Array {
            element: Box::new(element),
        }
    }

    pub fn object(type_id: impl Into<String>) -> Self {
        PinType::Object {
            type_id: type_id.into(),
        }
    }

    pub fn handle(type_id: impl Into<String>) -> Self {
        PinType::Handle {
            type_id: type_id.into(),
        }
    }

    /// Whether a value produced by a `source` pin may be fed into a pin of this type
    ///
    /// `Any` on either side is accepted; the value is then checked, if at all,
    /// by a cast node at runtime.
    pub fn is_assignable_from(&self, source: &PinType) -> bool {
        match (self, source) {
            (a, b) if a == b => true,
            (PinType::Any, _) | (_, PinType::Any) => true,
            (PinType::Float, PinType::Int) => true,
            (PinType::Array { element: a }, PinType::Array { element: b }) => {
                a.is_assignable_from(b)
            }
            (PinType::Object { type_id: a }, PinType::Object { .. }) => a.is_empty(),
            (PinType::Handle { type_id: a }, PinType::Handle { .. }) => a.is_empty(),
            _ => false,
        }
    }

    /// Literal a freshly created input pin of this type falls back to
    pub fn default_value(&self) -> Value {
        match self {
            PinType::Any | PinType::Object { .. } | PinType::Handle { .. } => Value::Null,
            PinType::Bool => Value::Bool(false),
            PinType::Int => Value::Int(0),
            PinType::Float => Value::Float(0.0),
            PinType::String => Value::String(String::new()),
            PinType::Array { .. } => Value::Array(Vec::new()),
        }
    }

    /// Runtime type test used by cast nodes
    ///
    /// Returns the value converted to this type, or `None` when the runtime
    /// value does not belong to it. Null only casts to `Any`.
    pub fn cast(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (PinType::Any, v) => Some(v.clone()),
            (PinType::Bool, Value::Bool(_)) => Some(value.clone()),
            (PinType::Int, Value::Int(_)) => Some(value.clone()),
            (PinType::Int, Value::Float(_)) => value.as_i64().map(Value::Int),
            (PinType::Float, Value::Float(_) | Value::Int(_)) => value.as_f64().map(Value::Float),
            (PinType::String, Value::String(_)) => Some(value.clone()),
            (PinType::Array { element }, Value::Array(items)) => items
                .iter()
                .map(|item| element.cast(item))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            (PinType::Object { type_id }, Value::Object { type_id: actual, .. }) => {
                (type_id.is_empty() || actual.as_deref() == Some(type_id.as_str()))
                    .then(|| value.clone())
            }
            (PinType::Handle { type_id }, Value::Handle(handle)) => {
                (type_id.is_empty() || handle.type_id == *type_id).then(|| value.clone())
            }
            _ => None,
        }
    }
}

impl fmt::Display for PinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinType::Any => write!(f, "Any"),
            PinType::Bool => write!(f, "Bool"),
            PinType::Int => write!(f, "Int"),
            PinType::Float => write!(f, "Float"),
            PinType::String => write!(f, "String"),
            PinType::Array { element } => write!(f, "Array<{element}>"),
            PinType::Object { type_id } if type_id.is_empty() => write!(f, "Object"),
            PinType::Object { type_id } => write!(f, "Object:{type_id}"),
            PinType::Handle { type_id } if type_id.is_empty() => write!(f, "Handle"),
            PinType::Handle { type_id } => write!(f, "Handle:{type_id}"),
        }
    }
}

/// Error parsing a type name typed into a literal-only pin
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown pin type: {0}")]
pub struct ParsePinTypeError(pub String);

impl FromStr for PinType {
    type Err = ParsePinTypeError;

    /// Parses the names produced by `Display` (`Int`, `Array<Float>`, `Handle:Player`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix("Array<").and_then(|r| r.strip_suffix('>')) {
            return Ok(PinType::array(inner.parse()?));
        }
        if let Some(type_id) = s.strip_prefix("Object:") {
            return Ok(PinType::object(type_id.trim()));
        }
        if let Some(type_id) = s.strip_prefix("Handle:") {
            return Ok(PinType::handle(type_id.trim()));
        }
        match s {
            "Any" => Ok(PinType::Any),
            "Bool" => Ok(PinType::Bool),
            "Int" => Ok(PinType::Int),
            "Float" => Ok(PinType::Float),
            "String" => Ok(PinType::String),
            "Object" => Ok(PinType::object("")),
            "Handle" => Ok(PinType::handle("")),
            _ => Err(ParsePinTypeError(s.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameters
// ─────────────────────────────────────────────────────────────────────────────

/// A named, typed parameter of a function, event, or native callable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub pin_type: PinType,
}

impl ParameterInfo {
    pub fn new(name: impl Into<String>, pin_type: PinType) -> Self {
        Self {
            name: name.into(),
            pin_type,
        }
    }
}
