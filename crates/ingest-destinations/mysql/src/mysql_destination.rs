use crate::MysqlDialect;
use async_trait::async_trait;
use ingest_core::{
    group_by_unit, Backend, Error, FieldValue, Fields, Record, RelationalBackend, Result,
    SchemaDialect, Statement,
};
use serde::{Deserialize, Serialize};
use sqlx::mysql::{
    MySql, MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow,
};
use sqlx::query::Query;
use sqlx::types::chrono::{NaiveDate, NaiveDateTime};
use sqlx::{Column, ConnectOptions, Connection as _, Executor, Row, TypeInfo};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Maximum number of connections in each handler's pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Recycle pooled connections after this many seconds
    #[serde(default = "default_conn_max_lifetime_secs")]
    pub conn_max_lifetime_secs: u64,

    /// Delete rows whose `update_at` is older than this many hours after
    /// every successful write to their table
    #[serde(default)]
    pub retention_hours: Option<u64>,
}

fn default_port() -> u16 {
    3306
}

fn default_max_connections() -> u32 {
    10
}

fn default_conn_max_lifetime_secs() -> u64 {
    120
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: default_port(),
            username: "root".to_string(),
            password: String::new(),
            max_connections: default_max_connections(),
            conn_max_lifetime_secs: default_conn_max_lifetime_secs(),
            retention_hours: None,
        }
    }
}

impl MysqlConfig {
    /// Options for the server itself, without a default database
    fn server_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
    }
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q FieldValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        FieldValue::Integer(v) => query.bind(*v),
        FieldValue::Unsigned(v) => query.bind(*v),
        FieldValue::Float(v) => query.bind(*v),
        FieldValue::Boolean(v) => query.bind(*v),
        FieldValue::String(v) => query.bind(v.as_str()),
        FieldValue::Null => query.bind(Option::<String>::None),
    }
}

fn prepare(statement: &Statement) -> Query<'_, MySql, MySqlArguments> {
    statement
        .params
        .iter()
        .fold(sqlx::query(&statement.sql), bind_value)
}

/// Decode one column by its declared type. Undecodable values become NULL.
fn column_value(row: &MySqlRow, index: usize) -> FieldValue {
    let decoded = match row.columns()[index].type_info().name() {
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .map(|v| v.map(FieldValue::Boolean)),
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row
            .try_get::<Option<u64>, _>(index)
            .map(|v| v.map(FieldValue::Unsigned)),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .map(|v| v.map(FieldValue::Integer)),
        "FLOAT" | "DOUBLE" => row
            .try_get::<Option<f64>, _>(index)
            .map(|v| v.map(FieldValue::Float)),
        "DATETIME" | "TIMESTAMP" => row.try_get::<Option<NaiveDateTime>, _>(index).map(|v| {
            v.map(|t| FieldValue::String(t.format("%Y-%m-%d %H:%M:%S").to_string()))
        }),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)
            .map(|v| v.map(|d| FieldValue::String(d.to_string()))),
        _ => row
            .try_get_unchecked::<Option<String>, _>(index)
            .map(|v| v.map(FieldValue::String)),
    };

    match decoded {
        Ok(value) => value.unwrap_or(FieldValue::Null),
        Err(e) => {
            debug!("Column {} not decodable: {}", index, e);
            FieldValue::Null
        }
    }
}

/// Relational backend writing into one MySQL database.
pub struct MysqlBackend {
    config: MysqlConfig,
    database: String,
    dialect: MysqlDialect,
}

impl MysqlBackend {
    pub fn new(config: MysqlConfig, database: impl Into<String>) -> Self {
        Self {
            config,
            database: database.into(),
            dialect: MysqlDialect::new(),
        }
    }

    async fn ensure_database(&self) -> Result<()> {
        let mut conn = self
            .config
            .server_options()
            .connect()
            .await
            .map_err(|e| Error::Connection(format!("Failed to connect to MySQL: {}", e)))?;

        let query = format!(
            "CREATE DATABASE IF NOT EXISTS `{}`",
            crate::sanitize_identifier(&self.database)
        );
        debug!("Executing: {}", query);
        conn.execute(query.as_str())
            .await
            .map_err(|e| {
                Error::Connection(format!(
                    "Failed to create database {}: {}",
                    self.database, e
                ))
            })?;

        if let Err(e) = conn.close().await {
            debug!("Closing bootstrap connection failed: {}", e);
        }
        Ok(())
    }

    async fn purge_expired(&self, pool: &MySqlPool, table: &str, hours: u64) {
        let query = format!(
            "DELETE FROM `{}`.`{}` WHERE update_at < NOW() - INTERVAL ? HOUR",
            crate::sanitize_identifier(&self.database),
            crate::sanitize_identifier(table)
        );
        if let Err(e) = sqlx::query(&query).bind(hours).execute(pool).await {
            warn!(
                database = self.database.as_str(),
                table, "Failed to purge expired rows: {}", e
            );
        }
    }
}

#[async_trait]
impl Backend for MysqlBackend {
    type Session = MySqlPool;

    fn name(&self) -> &str {
        "mysql"
    }

    fn database(&self) -> &str {
        &self.database
    }

    async fn open(&self) -> Result<MySqlPool> {
        info!(
            "Connecting to MySQL {}:{} database {}",
            self.config.host, self.config.port, self.database
        );
        self.ensure_database().await?;

        let options = self.config.server_options().database(&self.database);
        let pool = MySqlPoolOptions::new()
            .max_connections(self.config.max_connections)
            .max_lifetime(Duration::from_secs(self.config.conn_max_lifetime_secs))
            .connect_with(options)
            .await
            .map_err(|e| Error::Connection(format!("Failed to connect to MySQL: {}", e)))?;

        Ok(pool)
    }

    async fn write_batch(&self, session: &MySqlPool, records: &[Record]) -> Result<()> {
        let statements = self.dialect.encode_batch(records)?;
        if statements.is_empty() {
            return Ok(());
        }

        let mut tx = session
            .begin()
            .await
            .map_err(|e| Error::Write(format!("Failed to begin transaction: {}", e)))?;

        for statement in &statements {
            prepare(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::Write(format!("Database error: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Write(format!("Failed to commit transaction: {}", e)))?;

        debug!(
            database = self.database.as_str(),
            "Wrote {} rows in {} statement(s)",
            records.len(),
            statements.len()
        );

        if let Some(hours) = self.config.retention_hours {
            for (table, _) in group_by_unit(records) {
                self.purge_expired(session, table, hours).await;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl RelationalBackend for MysqlBackend {
    async fn execute(&self, session: &MySqlPool, statement: &str) -> Result<()> {
        debug!(database = self.database.as_str(), "Executing: {}", statement);
        session
            .execute(statement)
            .await
            .map_err(|e| Error::Generic(anyhow::anyhow!("Failed to execute statement: {}", e)))?;
        Ok(())
    }

    async fn query_row(
        &self,
        session: &MySqlPool,
        query: &str,
        params: &[FieldValue],
    ) -> Result<Option<Fields>> {
        let statement = Statement::with_params(query, params.to_vec());
        let row = prepare(&statement)
            .fetch_optional(session)
            .await
            .map_err(|e| Error::Generic(anyhow::anyhow!("Query failed: {}", e)))?;

        Ok(row.map(|row| {
            row.columns()
                .iter()
                .enumerate()
                .map(|(index, column)| (column.name().to_string(), column_value(&row, index)))
                .collect()
        }))
    }
}
