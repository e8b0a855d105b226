//! Column values and query parameters.

use std::fmt;

use bytes::{Bytes, BytesMut};
use serde::Serialize;

/// A column value as reported by a cursor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Binary(Bytes),
}

impl Value {
    /// Check if this value is NULL.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Append a continuation fragment of the same column.
    ///
    /// Text and binary fragments concatenate in place. A NULL slot takes the
    /// fragment as-is and a NULL fragment contributes nothing. Any other mix
    /// is joined as text.
    pub fn append(&mut self, fragment: Value) {
        if fragment.is_null() {
            return;
        }
        if self.is_null() {
            *self = fragment;
            return;
        }
        match (self, fragment) {
            (Value::Text(s), Value::Text(more)) => s.push_str(&more),
            (Value::Binary(b), Value::Binary(more)) => {
                let mut buf = BytesMut::with_capacity(b.len() + more.len());
                buf.extend_from_slice(b);
                buf.extend_from_slice(&more);
                *b = buf.freeze();
            }
            (current, fragment) => *current = Value::Text(format!("{current}{fragment}")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Binary(b) => f.write_str(&String::from_utf8_lossy(b)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Binary(Bytes::from(b))
    }
}

/// A positional query parameter.
///
/// Only text, numbers and binary can be rendered as literals; the remaining
/// variants exist so callers get a typed rejection instead of a silent cast.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Binary(Vec<u8>),
    /// Pre-serialized JSON document
    Json(String),
}

impl Param {
    /// Name of the parameter kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Param::Null => "null",
            Param::Bool(_) => "boolean",
            Param::Int(_) | Param::Float(_) => "number",
            Param::Text(_) => "string",
            Param::Binary(_) => "binary",
            Param::Json(_) => "json",
        }
    }
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Param::Text(s.to_string())
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Param::Text(s)
    }
}

impl From<i32> for Param {
    fn from(i: i32) -> Self {
        Param::Int(i64::from(i))
    }
}

impl From<i64> for Param {
    fn from(i: i64) -> Self {
        Param::Int(i)
    }
}

impl From<f64> for Param {
    fn from(f: f64) -> Self {
        Param::Float(f)
    }
}

impl From<bool> for Param {
    fn from(b: bool) -> Self {
        Param::Bool(b)
    }
}

impl From<Vec<u8>> for Param {
    fn from(b: Vec<u8>) -> Self {
        Param::Binary(b)
    }
}

impl From<&[u8]> for Param {
    fn from(b: &[u8]) -> Self {
        Param::Binary(b.to_vec())
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map_or(Param::Null, Into::into)
    }
}
