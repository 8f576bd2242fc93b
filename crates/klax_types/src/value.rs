//! Dynamic values carried on graph stacks, pins and variables.
//!
//! Every slot of a compiled graph's value stack holds one [`Value`]. Engine
//! objects (entities, components) never live on the stack directly; scripts
//! see them as [`Handle`]s that the owner resolves by Guid.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Handle Types
// ─────────────────────────────────────────────────────────────────────────────

/// Guid of an engine object referenced from a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(pub Uuid);

impl HandleId {
    /// Create a new unique handle ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for HandleId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to an engine object owned outside the script runtime
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    /// Guid of the referenced object
    pub id: HandleId,
    /// Engine type of the referenced object (e.g. "Player", "Light")
    pub type_id: String,
}

impl Handle {
    /// Create a handle to a fresh object
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            id: HandleId::new(),
            type_id: type_id.into(),
        }
    }

    /// Create a handle to an existing object
    pub fn with_id(id: impl Into<HandleId>, type_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_id: type_id.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// A dynamically typed script value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Value {
    /// Absent value; what an unreached function output yields
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    /// Plain data record, optionally tagged with a script-level type
    Object {
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        type_id: Option<String>,
        #[serde(default)]
        fields: BTreeMap<String, Value>,
    },
    /// Reference to an engine object
    Handle(Handle),
}

impl Value {
    /// Short name of the runtime kind, used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object { .. } => "object",
            Value::Handle(_) => "handle",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 (floats convert only when they hold a whole number)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Get as f64 (ints widen)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object { fields, .. } => Some(fields),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Object { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Script-level type tag of an object value
    pub fn object_type_id(&self) -> Option<&str> {
        match self {
            Value::Object { type_id, .. } => type_id.as_deref(),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Value::Handle(h) => Some(h),
            _ => None,
        }
    }

    /// Read a field of an object value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|fields| fields.get(key))
    }

    /// Create an object tagged with a script-level type
    pub fn typed_object<I, K, V>(type_id: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Object {
            type_id: Some(type_id.into()),
            fields: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Object { type_id, fields } => {
                if let Some(type_id) = type_id {
                    write!(f, "{type_id} ")?;
                }
                write!(f, "{{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Value::Handle(h) => write!(f, "<{} {}>", h.type_id, h.id),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// From Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Handle> for Value {
    fn from(h: Handle) -> Self {
        Value::Handle(h)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// serde_json::Value Interop
// ─────────────────────────────────────────────────────────────────────────────

// Plain JSON is how hosts hand arguments and property defaults to scripts.
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float))
                .unwrap_or_default(),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                let type_id = map
                    .get("__type__")
                    .and_then(|t| t.as_str())
                    .map(str::to_string);
                let fields = map
                    .into_iter()
                    .filter(|(k, _)| k != "__type__")
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect();
                Value::Object { type_id, fields }
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object { type_id, fields } => {
                let mut map: serde_json::Map<String, serde_json::Value> = fields
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect();
                if let Some(type_id) = type_id {
                    map.insert("__type__".to_string(), serde_json::Value::String(type_id));
                }
                serde_json::Value::Object(map)
            }
            Value::Handle(h) => {
                let mut map = serde_json::Map::new();
                map.insert(
                    "__handle__".to_string(),
                    serde_json::Value::String(h.id.to_string()),
                );
                map.insert("__type__".to_string(), serde_json::Value::String(h.type_id));
                serde_json::Value::Object(map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(Value::from(42).as_i64(), Some(42));
        assert_eq!(Value::from(42).as_f64(), Some(42.0));
        assert_eq!(Value::from(2.0).as_i64(), Some(2));
        assert_eq!(Value::from(2.5).as_i64(), None);
        assert_eq!(Value::from("x").as_i64(), None);
    }

    #[test]
    fn test_typed_object() {
        let v = Value::typed_object("Vector", [("x", 1.0), ("y", 2.0)]);
        assert_eq!(v.object_type_id(), Some("Vector"));
        assert_eq!(v.get("y").and_then(Value::as_f64), Some(2.0));
        assert!(v.get("z").is_none());
    }

    #[test]
    fn test_json_interop_keeps_type_tag() {
        let original = Value::typed_object("Hit", [("damage", Value::from(12))]);
        let json: serde_json::Value = original.clone().into();
        assert_eq!(json["__type__"], "Hit");
        assert_eq!(Value::from(json), original);
    }

    #[test]
    fn test_serde_format() {
        let json = serde_json::to_string(&Value::Int(3)).unwrap();
        assert_eq!(json, r#"{"kind":"Int","value":3}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Int(3));
    }

    #[test]
    fn test_display() {
        let v = Value::from(vec![1, 2]);
        assert_eq!(v.to_string(), "[1, 2]");
        assert_eq!(Value::Null.to_string(), "null");
    }
}
