//! Host-side value trees.
//!
//! A [`HostValue`] is an immutable, structurally copied view of a runtime
//! value. Conversion into runtime form allocates and retains; conversion
//! out copies everything and shares nothing with the heap.

mod convert;
pub mod json;

pub use convert::{from_runtime_value, to_runtime_value};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tern_core::{Itype, TypeKind};

#[derive(Clone, Debug, PartialEq)]
pub enum HostValue {
    Unit,
    Bool(bool),
    Int(i64),
    Double(f64),
    TypeId(Itype),
    Str(Arc<str>),
    /// A runtime string that is not valid UTF-8, byte for byte.
    Bytes(Arc<[u8]>),
    Vector(Arc<[HostValue]>),
    Map(Arc<BTreeMap<String, HostValue>>),
    Json(Arc<serde_json::Value>),
    /// Members in declaration order.
    Struct(Arc<[(String, HostValue)]>),
}

impl HostValue {
    pub fn str(s: &str) -> Self {
        HostValue::Str(Arc::from(s))
    }

    pub fn vector(items: impl IntoIterator<Item = HostValue>) -> Self {
        HostValue::Vector(items.into_iter().collect())
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, HostValue)>) -> Self {
        HostValue::Map(Arc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn structure<K: Into<String>>(members: impl IntoIterator<Item = (K, HostValue)>) -> Self {
        HostValue::Struct(members.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            HostValue::Unit => "unit",
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::Double(_) => "double",
            HostValue::TypeId(_) => "type",
            HostValue::Str(_) => "string",
            HostValue::Bytes(_) => "bytes",
            HostValue::Vector(_) => "vector",
            HostValue::Map(_) => "map",
            HostValue::Json(_) => "json",
            HostValue::Struct(_) => "struct",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            HostValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_slice(&self) -> Option<&[HostValue]> {
        match self {
            HostValue::Vector(items) => Some(items),
            _ => None,
        }
    }

    /// Member or map entry named `name`.
    pub fn field(&self, name: &str) -> Option<&HostValue> {
        match self {
            HostValue::Struct(members) => members.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            HostValue::Map(entries) => entries.get(name),
            _ => None,
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Str(s) => write!(f, "{s:?}"),
            HostValue::Bytes(b) => write!(f, "{:?}", String::from_utf8_lossy(b)),
            other => write!(f, "{other}"),
        }
    }
}

/// Short label for a kind, used in mismatch errors.
pub(crate) fn kind_label(kind: TypeKind) -> &'static str {
    match kind {
        TypeKind::Unit => "unit",
        TypeKind::Bool => "bool",
        TypeKind::Int => "int",
        TypeKind::Double => "double",
        TypeKind::TypeId => "type",
        TypeKind::String => "string",
        TypeKind::Vector { .. } => "vector",
        TypeKind::Map { .. } => "map",
        TypeKind::Json => "json",
        TypeKind::Struct => "struct",
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Unit => f.write_str("()"),
            HostValue::Bool(b) => f.write_str(if *b { "true" } else { "false" }),
            HostValue::Int(i) => {
                let mut buf = itoa::Buffer::new();
                f.write_str(buf.format(*i))
            }
            HostValue::Double(d) => {
                let mut buf = ryu::Buffer::new();
                f.write_str(buf.format(*d))
            }
            HostValue::TypeId(t) => write!(f, "<type {t}>"),
            HostValue::Str(s) => f.write_str(s),
            HostValue::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            HostValue::Vector(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_nested(f)?;
                }
                f.write_str("]")
            }
            HostValue::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k:?}: ")?;
                    v.fmt_nested(f)?;
                }
                f.write_str("}")
            }
            HostValue::Json(v) => write!(f, "{v}"),
            HostValue::Struct(members) => {
                f.write_str("(")?;
                for (i, (name, v)) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: ")?;
                    v.fmt_nested(f)?;
                }
                f.write_str(")")
            }
        }
    }
}
