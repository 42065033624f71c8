use ingest_core::{group_by_unit, FieldValue, Record, Result, SchemaDialect, Statement, ValueKind};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// MySQL caps a prepared statement at this many placeholders.
const MAX_PLACEHOLDERS: usize = 65_535;

/// Make an arbitrary field name usable as a column name.
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ' ' | '-' | '/' => '_',
            other => other,
        })
        .collect::<String>()
        .replace('`', "``")
}

fn quoted(name: &str) -> String {
    format!("`{}`", sanitize_identifier(name))
}

/// Fields keyed by column name, or `None` when two field names map to the
/// same column.
fn columns_of(record: &Record) -> Option<BTreeMap<String, &FieldValue>> {
    let mut row = BTreeMap::new();
    for (name, value) in record.fields() {
        let column = sanitize_identifier(name);
        if row.insert(column.clone(), value).is_some() {
            warn!(
                database = record.destination(),
                table = record.unit(),
                column = column.as_str(),
                "Dropping row: several fields map to the same column"
            );
            return None;
        }
    }
    Some(row)
}

/// Schema inference and batched upserts for MySQL.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    pub fn new() -> Self {
        Self
    }

    /// Column type for a scalar kind. Key columns get a shorter VARCHAR so
    /// composite primary keys stay under the index length limit.
    pub fn column_type(kind: ValueKind, is_key: bool) -> &'static str {
        match kind {
            ValueKind::Integer => "BIGINT",
            ValueKind::Unsigned => "BIGINT UNSIGNED",
            ValueKind::Float => "DOUBLE",
            ValueKind::Boolean => "BOOLEAN",
            ValueKind::String if is_key => "VARCHAR(180)",
            ValueKind::String => "VARCHAR(255)",
        }
    }

    fn encode_table(&self, database: &str, table: &str, rows: &[&Record]) -> Vec<Statement> {
        let rows: Vec<BTreeMap<String, &FieldValue>> =
            rows.iter().filter_map(|r| columns_of(r)).collect();
        if rows.is_empty() {
            return Vec::new();
        }
        let columns: BTreeSet<&String> = rows.iter().flat_map(|r| r.keys()).collect();

        let column_list = columns
            .iter()
            .map(|c| format!("`{}`", c))
            .collect::<Vec<_>>()
            .join(", ");
        let updates = columns
            .iter()
            .map(|c| format!("`{0}` = VALUES(`{0}`)", c))
            .collect::<Vec<_>>()
            .join(", ");
        let group = format!("({})", vec!["?"; columns.len()].join(", "));

        let rows_per_statement = (MAX_PLACEHOLDERS / columns.len().max(1)).max(1);
        rows.chunks(rows_per_statement)
            .map(|chunk| {
                let mut params = Vec::with_capacity(chunk.len() * columns.len());
                for row in chunk {
                    for column in &columns {
                        params.push(row.get(*column).map_or(FieldValue::Null, |v| (*v).clone()));
                    }
                }

                let sql = format!(
                    "INSERT INTO {}.{} ({}) VALUES {} ON DUPLICATE KEY UPDATE {}",
                    quoted(database),
                    quoted(table),
                    column_list,
                    vec![group.as_str(); chunk.len()].join(", "),
                    updates
                );
                Statement::with_params(sql, params)
            })
            .collect()
    }
}

impl SchemaDialect for MysqlDialect {
    fn infer_schema(&self, record: &Record, unique_keys: &[String]) -> Statement {
        let keys: Vec<String> = unique_keys.iter().map(|k| sanitize_identifier(k)).collect();
        let mut columns = Vec::new();
        let mut primary_key = Vec::new();

        // First field wins on a name collision; such rows are never written.
        let mut row = BTreeMap::new();
        for (name, value) in record.fields() {
            row.entry(sanitize_identifier(name)).or_insert(value);
        }
        for (name, value) in row {
            let is_key = keys.contains(&name);
            columns.push(format!(
                "`{}` {}",
                name,
                Self::column_type(value.kind(), is_key)
            ));
            if is_key {
                primary_key.push(format!("`{}`", name));
            }
        }

        columns.push("`create_at` DATETIME DEFAULT CURRENT_TIMESTAMP".to_string());
        columns.push(
            "`update_at` DATETIME DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP"
                .to_string(),
        );
        if !primary_key.is_empty() {
            columns.push(format!("PRIMARY KEY ({})", primary_key.join(", ")));
        }

        Statement::new(format!(
            "CREATE TABLE IF NOT EXISTS {}.{} ({})",
            quoted(record.destination()),
            quoted(record.unit()),
            columns.join(", ")
        ))
    }

    fn encode_batch(&self, records: &[Record]) -> Result<Vec<Statement>> {
        let Some(first) = records.first() else {
            return Ok(Vec::new());
        };
        let database = first.destination();

        Ok(group_by_unit(records)
            .into_iter()
            .flat_map(|(table, rows)| self.encode_table(database, table, &rows))
            .collect())
    }

    fn select_row(&self, database: &str, table: &str, columns: &[&str], keys: &[&str]) -> String {
        let columns = columns
            .iter()
            .map(|c| quoted(c))
            .collect::<Vec<_>>()
            .join(", ");
        let filter = keys
            .iter()
            .map(|k| format!("{} = ?", quoted(k)))
            .collect::<Vec<_>>()
            .join(" AND ");
        format!(
            "SELECT {} FROM {}.{} WHERE {} LIMIT 1",
            columns,
            quoted(database),
            quoted(table),
            filter
        )
    }
}
