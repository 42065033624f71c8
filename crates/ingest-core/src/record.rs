use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A single scalar carried in a record's field set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Boolean(bool),
    String(String),
    Null,
}

/// Kind of a scalar, used when inferring column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Unsigned,
    Float,
    Boolean,
    String,
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Integer(_) => ValueKind::Integer,
            FieldValue::Unsigned(_) => ValueKind::Unsigned,
            FieldValue::Float(_) => ValueKind::Float,
            FieldValue::Boolean(_) => ValueKind::Boolean,
            FieldValue::String(_) | FieldValue::Null => ValueKind::String,
        }
    }
}

impl From<Value> for FieldValue {
    /// Numbers keep their narrowest kind. Arrays and objects are carried as
    /// their JSON text.
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => FieldValue::Boolean(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    FieldValue::Unsigned(u)
                } else {
                    FieldValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => FieldValue::String(s),
            Value::Null => FieldValue::Null,
            other => FieldValue::String(other.to_string()),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Unsigned(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Unsigned(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Boolean(v) => write!(f, "{}", v),
            FieldValue::String(v) => write!(f, "{}", v),
            FieldValue::Null => write!(f, "null"),
        }
    }
}

pub type Tags = BTreeMap<String, String>;
pub type Fields = BTreeMap<String, FieldValue>;

/// One logical write unit: a relational row or a time-series point.
///
/// Records are immutable once built. Handing one to a pool moves it, so a
/// producer can never change a record that is already queued.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    destination: String,
    unit: String,
    tags: Tags,
    fields: Fields,
    timestamp: DateTime<Utc>,
}

impl Record {
    pub fn new(
        destination: impl Into<String>,
        unit: impl Into<String>,
        tags: Tags,
        fields: Fields,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let unit = unit.into();
        if fields.is_empty() {
            return Err(Error::InvalidRecord(format!(
                "record for '{}' has no fields",
                unit
            )));
        }

        Ok(Self {
            destination: destination.into(),
            unit,
            tags,
            fields,
            timestamp,
        })
    }

    /// A relational row: no tags, stamped with the time it was received.
    pub fn row(
        destination: impl Into<String>,
        table: impl Into<String>,
        fields: Fields,
    ) -> Result<Self> {
        Self::new(destination, table, Tags::new(), fields, Utc::now())
    }

    /// Destination database name.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Table or measurement name.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
