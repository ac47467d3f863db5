//! Tagged field values and their wire conversions.

use crate::error::{BridgeError, BridgeResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Declared type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Bool,
    Int,
    Float,
    Guid,
    DateTime,
    /// Numeric enum; names accepted on input in declaration order.
    Enum(&'static [&'static str]),
    /// Opaque JSON (complex values, label arrays, ...).
    Json,
}

/// A field value as stored on an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Guid(Uuid),
    DateTime(DateTime<Utc>),
    Enum(i64),
    Json(Value),
}

impl FieldValue {
    /// Convert a wire value into the declared kind.
    pub fn from_wire(kind: FieldKind, wire: &Value) -> BridgeResult<Self> {
        if wire.is_null() {
            return Ok(FieldValue::Null);
        }
        let mismatch = || {
            BridgeError::serialization(format!("cannot read {} as {:?}", wire, kind))
        };
        let value = match kind {
            FieldKind::Text => match wire {
                Value::String(s) => FieldValue::Text(s.clone()),
                Value::Number(n) => FieldValue::Text(n.to_string()),
                Value::Bool(b) => FieldValue::Text(b.to_string()),
                _ => return Err(mismatch()),
            },
            FieldKind::Bool => match wire {
                Value::Bool(b) => FieldValue::Bool(*b),
                Value::String(s) if s.eq_ignore_ascii_case("true") => FieldValue::Bool(true),
                Value::String(s) if s.eq_ignore_ascii_case("false") => FieldValue::Bool(false),
                _ => return Err(mismatch()),
            },
            FieldKind::Int => match wire {
                Value::Number(n) => FieldValue::Int(n.as_i64().ok_or_else(mismatch)?),
                // Edm.Int64 arrives as a string in verbose OData.
                Value::String(s) => FieldValue::Int(s.parse().map_err(|_| mismatch())?),
                _ => return Err(mismatch()),
            },
            FieldKind::Float => match wire {
                Value::Number(n) => FieldValue::Float(n.as_f64().ok_or_else(mismatch)?),
                Value::String(s) => FieldValue::Float(s.parse().map_err(|_| mismatch())?),
                _ => return Err(mismatch()),
            },
            FieldKind::Guid => match wire {
                Value::String(s) => FieldValue::Guid(Uuid::parse_str(s).map_err(|_| mismatch())?),
                _ => return Err(mismatch()),
            },
            FieldKind::DateTime => match wire {
                Value::String(s) => FieldValue::DateTime(parse_datetime(s).ok_or_else(mismatch)?),
                _ => return Err(mismatch()),
            },
            FieldKind::Enum(names) => match wire {
                Value::Number(n) => FieldValue::Enum(n.as_i64().ok_or_else(mismatch)?),
                Value::String(s) => match s.parse::<i64>() {
                    Ok(n) => FieldValue::Enum(n),
                    Err(_) => names
                        .iter()
                        .position(|name| name.eq_ignore_ascii_case(s))
                        .map(|i| FieldValue::Enum(i as i64))
                        .ok_or_else(mismatch)?,
                },
                _ => return Err(mismatch()),
            },
            FieldKind::Json => FieldValue::Json(wire.clone()),
        };
        Ok(value)
    }

    /// Wire representation for request bodies.
    pub fn to_wire(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(n) => Value::from(*n),
            FieldValue::Float(f) => Value::from(*f),
            FieldValue::Guid(g) => Value::String(g.to_string()),
            FieldValue::DateTime(d) => Value::String(d.to_rfc3339()),
            FieldValue::Enum(n) => Value::from(*n),
            FieldValue::Json(v) => v.clone(),
        }
    }

    /// Text used when the value fills a URL placeholder; `None` for null.
    pub fn to_path_segment(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Json(Value::String(s)) => Some(s.clone()),
            FieldValue::Json(_) => None,
            other => Some(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(n) | FieldValue::Enum(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            FieldValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            FieldValue::Guid(g) => Some(*g),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::DateTime(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FieldValue::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(n) | FieldValue::Enum(n) => write!(f, "{}", n),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Guid(g) => write!(f, "{}", g),
            FieldValue::DateTime(d) => write!(f, "{}", d.to_rfc3339()),
            FieldValue::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Int(n)
    }
}

impl From<f64> for FieldValue {
    fn from(x: f64) -> Self {
        FieldValue::Float(x)
    }
}

impl From<Uuid> for FieldValue {
    fn from(g: Uuid) -> Self {
        FieldValue::Guid(g)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(d: DateTime<Utc>) -> Self {
        FieldValue::DateTime(d)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// RFC 3339, or the zone-less form SharePoint uses for some dates.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|n| n.and_utc())
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
