use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type Id = String;

/// Primitive type of a schema property, also used as the declared type of a
/// bound SQL parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    String,
    Int,
    Long,
    Double,
    Bool,
    #[serde(alias = "dateTime", alias = "datetime")]
    DateTime,
    Binary,
    Stream,
}

impl PrimitiveType {
    /// Stream and binary payloads cannot take part in a WHERE comparison.
    pub fn is_filterable(&self) -> bool {
        !matches!(self, PrimitiveType::Binary | PrimitiveType::Stream)
    }
}

/// A single scalar value read from or bound to the relational store.
///
/// `Null` is the explicit "is-null" state of a property, distinct from the
/// property being absent on an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Binary(Vec<u8>),
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Value::String(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// The primitive type a value naturally binds as; `None` for `Null`.
    pub fn primitive_type(&self) -> Option<PrimitiveType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(PrimitiveType::Bool),
            Value::Int(_) => Some(PrimitiveType::Int),
            Value::Long(_) => Some(PrimitiveType::Long),
            Value::Double(_) => Some(PrimitiveType::Double),
            Value::String(_) => Some(PrimitiveType::String),
            Value::DateTime(_) => Some(PrimitiveType::DateTime),
            Value::Binary(_) => Some(PrimitiveType::Binary),
        }
    }

    /// Conversion used when a column lands in an instance's extended-data bag.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Long(v) => serde_json::Value::from(*v),
            Value::Double(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            Value::Binary(bytes) => serde_json::Value::String(hex::encode(bytes)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Binary(bytes) => write!(f, "0x{}", hex::encode(bytes)),
        }
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

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}
