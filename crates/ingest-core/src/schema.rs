use crate::{FieldValue, Record, Result};

/// A statement plus the positional parameters it binds.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<FieldValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<FieldValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Turns records into DDL and batched upserts for a relational store.
pub trait SchemaDialect: Send + Sync {
    /// Table definition inferred from one record. `unique_keys` become the
    /// primary key.
    fn infer_schema(&self, record: &Record, unique_keys: &[String]) -> Statement;

    /// One upsert per table covering every record for that table, in the
    /// order tables first appear in `records`.
    fn encode_batch(&self, records: &[Record]) -> Result<Vec<Statement>>;

    /// Select `columns` from one row matched on every column in `keys`, with
    /// one positional parameter per key in order.
    fn select_row(&self, database: &str, table: &str, columns: &[&str], keys: &[&str]) -> String;
}

/// Split records by unit, keeping first-seen unit order and record order
/// within each unit.
pub fn group_by_unit(records: &[Record]) -> Vec<(&str, Vec<&Record>)> {
    let mut groups: Vec<(&str, Vec<&Record>)> = Vec::new();
    for record in records {
        match groups.iter_mut().find(|(unit, _)| *unit == record.unit()) {
            Some((_, rows)) => rows.push(record),
            None => groups.push((record.unit(), vec![record])),
        }
    }
    groups
}
