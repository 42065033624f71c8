use crate::{Error, FieldValue, Fields, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Columns identifying one server in a resource table.
pub const RESOURCE_KEYS: [&str; 2] = ["hostname", "serial_number"];

const BOOT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Where host addresses are looked up for server resource reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLookup {
    pub database: String,
    pub table: String,

    /// Column holding the hostname
    pub name_column: String,

    /// Column holding the IPv4 address
    pub address_column: String,
}

impl Default for ResourceLookup {
    fn default() -> Self {
        Self {
            database: "venus_master".to_string(),
            table: "map_table".to_string(),
            name_column: "name".to_string(),
            address_column: "IP".to_string(),
        }
    }
}

/// A string field that must be present.
pub(crate) fn required_text(fields: &Fields, key: &str) -> Result<String> {
    match fields.get(key) {
        Some(FieldValue::Null) | None => Err(Error::Decode(format!("missing '{}'", key))),
        Some(FieldValue::String(v)) if v.is_empty() => {
            Err(Error::Decode(format!("empty '{}'", key)))
        }
        Some(value) => Ok(value.to_string()),
    }
}

pub(crate) fn text(value: Option<&FieldValue>) -> String {
    match value {
        Some(FieldValue::Null) | None => String::new(),
        Some(v) => v.to_string(),
    }
}

fn same_boot(stored: &str, reported: &str) -> bool {
    let parse = |s: &str| NaiveDateTime::parse_from_str(s.trim(), BOOT_TIME_FORMAT).ok();
    match (parse(stored), parse(reported)) {
        (Some(a), Some(b)) => a == b,
        _ => stored.trim() == reported.trim(),
    }
}

/// Boot counter for a report, given the row already stored for the server.
/// A new server starts at 1, and the counter moves on whenever the reported
/// boot time differs from the stored one.
pub(crate) fn next_boot_count(stored: Option<&Fields>, reported_boot_time: &str) -> i64 {
    let Some(row) = stored else {
        return 1;
    };
    let count = match row.get("boot_count") {
        Some(FieldValue::Integer(v)) => *v,
        Some(FieldValue::Unsigned(v)) => i64::try_from(*v).unwrap_or(i64::MAX),
        _ => 0,
    };
    if same_boot(&text(row.get("boot_time")), reported_boot_time) {
        count
    } else {
        count.saturating_add(1)
    }
}
