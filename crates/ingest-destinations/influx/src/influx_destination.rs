use crate::line_protocol;
use async_trait::async_trait;
use chrono::Utc;
use ingest_core::{Backend, Error, Record, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Fixed timeout for every HTTP call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_port() -> u16 {
    8086
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl InfluxConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// HTTP client plus the server it talks to.
#[derive(Debug, Clone)]
pub struct InfluxSession {
    client: reqwest::Client,
    base_url: String,
}

/// Check the body of a `/query` response. InfluxDB reports statement errors
/// with a 200 status and an `error` entry.
fn check_query_response(body: &Value) -> std::result::Result<(), String> {
    if let Some(err) = body.get("error").and_then(Value::as_str) {
        return Err(err.to_string());
    }
    let results = body
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| "response has no results".to_string())?;
    for result in results {
        if let Some(err) = result.get("error").and_then(Value::as_str) {
            return Err(err.to_string());
        }
    }
    Ok(())
}

/// Time-series backend writing into one InfluxDB 1.x database.
pub struct InfluxBackend {
    config: InfluxConfig,
    database: String,
}

impl InfluxBackend {
    pub fn new(config: InfluxConfig, database: impl Into<String>) -> Self {
        Self {
            config,
            database: database.into(),
        }
    }

    async fn ensure_database(&self, session: &InfluxSession) -> Result<()> {
        let statement = format!(
            "CREATE DATABASE \"{}\"",
            self.database.replace('\\', "\\\\").replace('"', "\\\"")
        );
        let response = session
            .client
            .post(format!("{}/query", session.base_url))
            .query(&[("q", statement.as_str())])
            .send()
            .await
            .map_err(|e| Error::Connection(format!("Failed to reach InfluxDB: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Connection(format!(
                "Failed to create database {}: {} {}",
                self.database, status, text
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Connection(format!("Bad InfluxDB response: {}", e)))?;
        check_query_response(&body).map_err(|e| {
            Error::Connection(format!("Failed to create database {}: {}", self.database, e))
        })?;

        debug!(database = self.database.as_str(), "Database ensured");
        Ok(())
    }
}

#[async_trait]
impl Backend for InfluxBackend {
    type Session = InfluxSession;

    fn name(&self) -> &str {
        "influx"
    }

    fn database(&self) -> &str {
        &self.database
    }

    async fn open(&self) -> Result<InfluxSession> {
        info!(
            "Connecting to InfluxDB {} database {}",
            self.config.base_url(),
            self.database
        );
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| Error::Connection(format!("Failed to build HTTP client: {}", e)))?;

        let session = InfluxSession {
            client,
            base_url: self.config.base_url(),
        };
        self.ensure_database(&session).await?;
        Ok(session)
    }

    async fn write_batch(&self, session: &InfluxSession, records: &[Record]) -> Result<()> {
        let start_ns = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let (body, written) = line_protocol::encode_batch(records, start_ns);
        if written == 0 {
            debug!(database = self.database.as_str(), "Nothing storable in batch");
            return Ok(());
        }

        let response = session
            .client
            .post(format!("{}/write", session.base_url))
            .query(&[("db", self.database.as_str()), ("precision", "ns")])
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Write(format!("InfluxDB write failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Write(format!(
                "InfluxDB rejected batch: {} {}",
                status,
                text.trim()
            )));
        }

        debug!(
            database = self.database.as_str(),
            "Wrote {} points", written
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_response_ok() {
        assert!(check_query_response(&json!({"results": [{"statement_id": 0}]})).is_ok());
    }

    #[test]
    fn test_query_response_statement_error() {
        let body = json!({"results": [{"statement_id": 0, "error": "authorization failed"}]});
        assert_eq!(
            check_query_response(&body).unwrap_err(),
            "authorization failed"
        );
    }

    #[test]
    fn test_query_response_top_level_error() {
        assert!(check_query_response(&json!({"error": "bad query"})).is_err());
        assert!(check_query_response(&json!({})).is_err());
    }

    #[test]
    fn test_config_defaults_and_url() {
        let config: InfluxConfig = serde_json::from_value(json!({"host": "tsdb"})).unwrap();
        assert_eq!(config.port, 8086);
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.base_url(), "http://tsdb:8086");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let config = InfluxConfig {
            host: "127.0.0.1".to_string(),
            port: 9,
            timeout_secs: 2,
        };
        let backend = InfluxBackend::new(config, "metrics");
        assert!(matches!(backend.open().await, Err(Error::Connection(_))));
    }
}
