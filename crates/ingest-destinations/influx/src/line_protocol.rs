//! InfluxDB line protocol encoding.
//!
//! `measurement,tag=v field=1i,other="s" 1700000000000000000`

use ingest_core::{FieldValue, Record};
use std::fmt::Write;

fn escape_into(out: &mut String, raw: &str, specials: &[char]) {
    for c in raw.chars() {
        if specials.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Escape a name. Line breaks cannot be escaped in names, so they become
/// escaped spaces and the point stays on one line.
fn escape_name_into(out: &mut String, raw: &str, specials: &[char]) {
    for c in raw.chars() {
        let c = if c == '\n' || c == '\r' { ' ' } else { c };
        if specials.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

fn write_measurement(out: &mut String, name: &str) {
    escape_name_into(out, name, &[',', ' ', '\\']);
}

/// Tag keys, tag values and field keys share the same escaping.
fn write_key(out: &mut String, key: &str) {
    escape_name_into(out, key, &[',', '=', ' ', '\\']);
}

/// Append a field value, or return false when the value cannot be stored.
fn write_field_value(out: &mut String, value: &FieldValue) -> bool {
    match value {
        FieldValue::Integer(v) => {
            let _ = write!(out, "{}i", v);
        }
        FieldValue::Unsigned(v) => match i64::try_from(*v) {
            Ok(signed) => {
                let _ = write!(out, "{}i", signed);
            }
            Err(_) => {
                let _ = write!(out, "{}", *v as f64);
            }
        },
        FieldValue::Float(v) if v.is_finite() => {
            let _ = write!(out, "{}", v);
        }
        FieldValue::Float(_) | FieldValue::Null => return false,
        FieldValue::Boolean(v) => {
            let _ = write!(out, "{}", v);
        }
        FieldValue::String(v) => {
            out.push('"');
            escape_into(out, v, &['"', '\\']);
            out.push('"');
        }
    }
    true
}

/// Append one point as a line, stamped with `timestamp_ns` instead of the
/// record's own time. Returns false, leaving `out` untouched, when the record
/// has no storable field.
pub fn encode_point(out: &mut String, record: &Record, timestamp_ns: i64) -> bool {
    let start = out.len();
    write_measurement(out, record.unit());

    for (key, value) in record.tags() {
        if value.is_empty() {
            continue;
        }
        out.push(',');
        write_key(out, key);
        out.push('=');
        write_key(out, value);
    }

    let mut separator = ' ';
    for (key, value) in record.fields() {
        let mark = out.len();
        out.push(separator);
        write_key(out, key);
        out.push('=');
        if write_field_value(out, value) {
            separator = ',';
        } else {
            out.truncate(mark);
        }
    }

    if separator == ' ' {
        out.truncate(start);
        return false;
    }

    let _ = writeln!(out, " {}", timestamp_ns);
    true
}

/// Encode a batch. Record `i` is stamped `start_ns + i` so points that share
/// a series never overwrite each other.
pub fn encode_batch(records: &[Record], start_ns: i64) -> (String, usize) {
    let mut body = String::with_capacity(records.len() * 64);
    let mut written = 0;
    for (i, record) in records.iter().enumerate() {
        if encode_point(&mut body, record, start_ns + i as i64) {
            written += 1;
        }
    }
    (body, written)
}
