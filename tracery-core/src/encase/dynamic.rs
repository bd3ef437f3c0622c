//! Dynamic Values
//!
//! [`Dynamic`] is the value domain of the tracked object model: primitives
//! plus nested [`Obj`] references. Equality is strict: two handles compare
//! equal only when they are the same view of the same object; use
//! [`equal`](crate::encase::equal) for view-transparent comparison.

use std::fmt;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use super::obj::Obj;

/// A dynamically typed value stored in a tracked object graph.
#[derive(Clone)]
pub enum Dynamic {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Obj(Obj),
}

impl Dynamic {
    /// The contained object, if this is an object reference.
    pub fn as_obj(&self) -> Option<&Obj> {
        match self {
            Dynamic::Obj(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Dynamic::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Dynamic::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Dynamic::Null)
    }

    /// Untracked snapshot as JSON. Objects serialize their own entries in
    /// insertion order; prototype chains are not flattened and cyclic
    /// graphs are not supported.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Dynamic::Null => serde_json::Value::Null,
            Dynamic::Bool(v) => serde_json::Value::Bool(*v),
            Dynamic::Int(v) => serde_json::Value::from(*v),
            Dynamic::Float(v) => serde_json::Value::from(*v),
            Dynamic::Str(v) => serde_json::Value::String(v.to_string()),
            Dynamic::Obj(obj) => {
                let mut map = serde_json::Map::new();
                for (key, value) in obj.entries_snapshot() {
                    map.insert(key.to_string(), value.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }
}

/// Strict equality: object references compare by view identity.
impl PartialEq for Dynamic {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Dynamic::Null, Dynamic::Null) => true,
            (Dynamic::Bool(a), Dynamic::Bool(b)) => a == b,
            (Dynamic::Int(a), Dynamic::Int(b)) => a == b,
            (Dynamic::Float(a), Dynamic::Float(b)) => a == b,
            (Dynamic::Str(a), Dynamic::Str(b)) => a == b,
            (Dynamic::Obj(a), Dynamic::Obj(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Dynamic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dynamic::Null => write!(f, "Null"),
            Dynamic::Bool(v) => write!(f, "Bool({v})"),
            Dynamic::Int(v) => write!(f, "Int({v})"),
            Dynamic::Float(v) => write!(f, "Float({v})"),
            Dynamic::Str(v) => write!(f, "Str({v:?})"),
            Dynamic::Obj(obj) => obj.fmt(f),
        }
    }
}

impl From<bool> for Dynamic {
    fn from(v: bool) -> Self {
        Dynamic::Bool(v)
    }
}

impl From<i64> for Dynamic {
    fn from(v: i64) -> Self {
        Dynamic::Int(v)
    }
}

impl From<i32> for Dynamic {
    fn from(v: i32) -> Self {
        Dynamic::Int(v as i64)
    }
}

impl From<f64> for Dynamic {
    fn from(v: f64) -> Self {
        Dynamic::Float(v)
    }
}

impl From<&str> for Dynamic {
    fn from(v: &str) -> Self {
        Dynamic::Str(Arc::from(v))
    }
}

impl From<String> for Dynamic {
    fn from(v: String) -> Self {
        Dynamic::Str(Arc::from(v.as_str()))
    }
}

impl From<Obj> for Dynamic {
    fn from(v: Obj) -> Self {
        Dynamic::Obj(v)
    }
}

impl From<serde_json::Value> for Dynamic {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Dynamic::Null,
            serde_json::Value::Bool(b) => Dynamic::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Dynamic::Int(i)
                } else {
                    Dynamic::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Dynamic::Str(Arc::from(s.as_str())),
            serde_json::Value::Array(items) => {
                // Arrays land as objects with decimal-index keys.
                let obj = Obj::new();
                for (index, item) in items.into_iter().enumerate() {
                    obj.set(index.to_string(), Dynamic::from(item));
                }
                Dynamic::Obj(obj)
            }
            serde_json::Value::Object(fields) => {
                let obj = Obj::new();
                for (key, field) in fields {
                    obj.set(key, Dynamic::from(field));
                }
                Dynamic::Obj(obj)
            }
        }
    }
}

impl Serialize for Dynamic {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Dynamic::Null => serializer.serialize_unit(),
            Dynamic::Bool(v) => serializer.serialize_bool(*v),
            Dynamic::Int(v) => serializer.serialize_i64(*v),
            Dynamic::Float(v) => serializer.serialize_f64(*v),
            Dynamic::Str(v) => serializer.serialize_str(v),
            Dynamic::Obj(obj) => obj.serialize(serializer),
        }
    }
}

impl Serialize for Obj {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let entries = self.entries_snapshot();
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key.as_ref(), &value)?;
        }
        map.end()
    }
}
