use crate::{Error, FieldValue, Fields, Record, Result, Tags};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// What a topic carries, and therefore which backend it feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    TimeseriesWrite,
    RelationalInsert,
    RelationalCreateTable,
    /// Relational insert of a server inventory report, enriched with the
    /// host's address and a boot counter before it is written
    ServerResource,
}

/// Time-series point as published on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeseriesWrite {
    pub db_name: String,
    pub measurement: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub fields: HashMap<String, Value>,
    /// RFC3339 with optional nanoseconds
    pub timestamp: String,
}

/// Row insert as published on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationalInsert {
    pub db_name: String,
    pub table_name: String,
    pub data: HashMap<String, Value>,
}

/// Explicit table creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationalCreateTable {
    pub db_name: String,
    pub table_name: String,
    pub sql: String,
}

fn decode<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| Error::Decode(e.to_string()))
}

fn to_fields(values: HashMap<String, Value>) -> Fields {
    values
        .into_iter()
        .map(|(k, v)| (k, FieldValue::from(v)))
        .collect()
}

impl TimeseriesWrite {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        decode(payload)
    }

    pub fn into_record(self) -> Result<Record> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| Error::Decode(format!("bad timestamp '{}': {}", self.timestamp, e)))?
            .with_timezone(&Utc);
        let tags: Tags = self.tags.into_iter().collect();

        Record::new(
            self.db_name,
            self.measurement,
            tags,
            to_fields(self.fields),
            timestamp,
        )
    }
}

impl RelationalInsert {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        decode(payload)
    }

    pub fn into_record(self) -> Result<Record> {
        let (db_name, table_name, fields) = self.into_parts();
        Record::row(db_name, table_name, fields)
    }

    /// Database, table and decoded row, for callers that still need to
    /// adjust the row before building a record.
    pub fn into_parts(self) -> (String, String, Fields) {
        (self.db_name, self.table_name, to_fields(self.data))
    }
}

impl RelationalCreateTable {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        decode(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeseries_write_decodes_with_nanos() {
        let payload = br#"{
            "db_name": "switch",
            "measurement": "port",
            "tags": {"host": "sw1"},
            "fields": {"rx": 10, "up": true},
            "timestamp": "2024-05-01T12:00:00.123456789Z"
        }"#;

        let record = TimeseriesWrite::decode(payload)
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(record.destination(), "switch");
        assert_eq!(record.unit(), "port");
        assert_eq!(record.tags()["host"], "sw1");
        assert_eq!(record.fields()["rx"], FieldValue::Integer(10));
        assert_eq!(record.timestamp().timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn test_bad_timestamp_is_decode_error() {
        let msg = TimeseriesWrite {
            db_name: "db".to_string(),
            measurement: "m".to_string(),
            tags: HashMap::new(),
            fields: HashMap::from([("v".to_string(), Value::from(1))]),
            timestamp: "yesterday".to_string(),
        };
        assert!(matches!(msg.into_record(), Err(Error::Decode(_))));
    }

    #[test]
    fn test_malformed_json_is_decode_error() {
        assert!(matches!(
            RelationalInsert::decode(b"{\"db_name\": 1"),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_relational_insert_without_data_is_invalid() {
        let msg = RelationalInsert::decode(br#"{"db_name":"d","table_name":"t","data":{}}"#)
            .unwrap();
        assert!(matches!(msg.into_record(), Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn test_kind_names() {
        let kind: MessageKind = serde_json::from_str("\"relational_create_table\"").unwrap();
        assert_eq!(kind, MessageKind::RelationalCreateTable);
        let kind: MessageKind = serde_json::from_str("\"server_resource\"").unwrap();
        assert_eq!(kind, MessageKind::ServerResource);
    }
}
