mod descriptor;

use ingest_core::{MessageKind, PoolSettings, ResourceLookup};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use descriptor::{parse_broker_list, InfluxDescriptor, MysqlDescriptor};

/// Prefix of every environment override, `INGEST_<SECTION>__<KEY>`
pub const ENV_PREFIX: &str = "INGEST";

/// Connection descriptors read from the environment by the CLI. Their keys
/// sit next to the config sections and must not collide with them.
pub const BROKER_ENV: &str = "INGEST_BROKER";
pub const MYSQL_SERVER_ENV: &str = "INGEST_MYSQL_SERVER";
pub const INFLUX_SERVER_ENV: &str = "INGEST_INFLUX_SERVER";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Relational pool sizing
    pub mysql: PoolSettings,

    /// Time-series pool sizing
    pub influx: PoolSettings,

    pub mysql_options: MysqlOptions,
    pub influx_options: InfluxOptions,

    /// Host address lookup for `server_resource` topics
    #[serde(default)]
    pub server_resource: ResourceLookup,

    pub topics: Vec<TopicConfig>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlOptions {
    /// Infer and create tables before the first insert into them
    pub auto_create_tables: bool,

    /// Connections in each handler's pool
    pub max_connections: u32,

    pub conn_max_lifetime_secs: u64,

    /// Delete rows older than this many hours after each batch
    #[serde(default)]
    pub retention_hours: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxOptions {
    /// Timeout for every HTTP call
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    pub group_id: String,
    pub kind: MessageKind,

    /// Parallel subscriptions for this topic
    pub consumers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON formatted logs
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mysql: PoolSettings {
                pool_size: 80,
                max_batch_size: 10,
                max_interval_secs: 10,
                queue_capacity: 100,
            },
            influx: PoolSettings {
                pool_size: 80,
                max_batch_size: 5000,
                max_interval_secs: 5,
                queue_capacity: 100,
            },
            mysql_options: MysqlOptions {
                auto_create_tables: true,
                max_connections: 10,
                conn_max_lifetime_secs: 120,
                retention_hours: None,
            },
            influx_options: InfluxOptions { timeout_secs: 60 },
            server_resource: ResourceLookup::default(),
            topics: vec![
                TopicConfig {
                    name: "influx_write".to_string(),
                    group_id: "influx_group".to_string(),
                    kind: MessageKind::TimeseriesWrite,
                    consumers: 1,
                },
                TopicConfig {
                    name: "mysql_insert".to_string(),
                    group_id: "mysql_group".to_string(),
                    kind: MessageKind::RelationalInsert,
                    consumers: 1,
                },
                TopicConfig {
                    name: "mysql_create_table".to_string(),
                    group_id: "mysql_group".to_string(),
                    kind: MessageKind::RelationalCreateTable,
                    consumers: 1,
                },
            ],
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

impl AppConfig {
    pub fn load(config_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::load_with_env(config_dir, None)
    }

    /// Load with `env` standing in for the process environment when given.
    pub fn load_with_env(
        config_dir: impl AsRef<Path>,
        env: Option<config::Map<String, String>>,
    ) -> anyhow::Result<Self> {
        let config_dir = config_dir.as_ref();
        let s = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(
                config::File::with_name(&config_dir.join("default.yaml").to_string_lossy())
                    .required(false),
            )
            // Local overrides, not checked in
            .add_source(
                config::File::with_name(&config_dir.join("local.yaml").to_string_lossy())
                    .required(false),
            )
            // INGEST_INFLUX__MAX_BATCH_SIZE=1000
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .source(env),
            )
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that would leave a pool or topic unable to make progress
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, settings) in [("mysql", &self.mysql), ("influx", &self.influx)] {
            if settings.pool_size == 0 {
                anyhow::bail!("{}.pool_size must be at least 1", name);
            }
            if settings.queue_capacity == 0 {
                anyhow::bail!("{}.queue_capacity must be at least 1", name);
            }
            if settings.max_batch_size == 0 {
                anyhow::bail!("{}.max_batch_size must be at least 1", name);
            }
        }

        let mut seen = std::collections::HashSet::new();
        for topic in &self.topics {
            if !seen.insert(topic.name.as_str()) {
                anyhow::bail!("topic '{}' is configured twice", topic.name);
            }
            if topic.consumers == 0 {
                anyhow::bail!("topic '{}' needs at least one consumer", topic.name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> Option<config::Map<String, String>> {
        Some(config::Map::new())
    }

    fn env(pairs: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("ingest-config-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_defaults_without_files() {
        let dir = scratch_dir("empty");
        let config = AppConfig::load_with_env(&dir, no_env()).unwrap();

        assert_eq!(config.mysql.max_batch_size, 10);
        assert_eq!(config.influx.max_batch_size, 5000);
        assert_eq!(config.influx.max_interval_secs, 5);
        assert!(config.mysql_options.auto_create_tables);
        assert!(config.mysql_options.retention_hours.is_none());
        assert_eq!(config.topics.len(), 3);
        assert_eq!(config.server_resource.table, "map_table");
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = scratch_dir("override");
        std::fs::write(
            dir.join("default.yaml"),
            "influx:\n  pool_size: 4\n  max_batch_size: 200\n  max_interval_secs: 1\n  queue_capacity: 8\n",
        )
        .unwrap();
        std::fs::write(dir.join("local.yaml"), "logging:\n  level: debug\n  json: true\n").unwrap();

        let config = AppConfig::load_with_env(&dir, no_env()).unwrap();
        assert_eq!(config.influx.pool_size, 4);
        assert_eq!(config.influx.max_batch_size, 200);
        assert_eq!(config.mysql.pool_size, 80);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_env_overrides_files() {
        let dir = scratch_dir("env");
        std::fs::write(
            dir.join("default.yaml"),
            "influx:\n  pool_size: 4\n  max_batch_size: 200\n  max_interval_secs: 1\n  queue_capacity: 8\n",
        )
        .unwrap();

        let config = AppConfig::load_with_env(
            &dir,
            env(&[
                ("INGEST_INFLUX__MAX_BATCH_SIZE", "1000"),
                ("INGEST_LOGGING__LEVEL", "warn"),
                ("INGEST_SERVER_RESOURCE__DATABASE", "inventory"),
            ]),
        )
        .unwrap();
        assert_eq!(config.server_resource.database, "inventory");
        assert_eq!(config.influx.max_batch_size, 1000);
        assert_eq!(config.influx.pool_size, 4);
        assert_eq!(config.logging.level, "warn");
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_descriptor_env_vars_leave_sections_alone() {
        let dir = scratch_dir("descriptors");
        let config = AppConfig::load_with_env(
            &dir,
            env(&[
                (BROKER_ENV, "10.0.0.1:4222;10.0.0.2:4222"),
                (MYSQL_SERVER_ENV, "db:3306@root/pw"),
                (INFLUX_SERVER_ENV, "tsdb:8086"),
            ]),
        )
        .unwrap();
        assert_eq!(config.mysql.pool_size, 80);
        assert_eq!(config.influx.max_batch_size, 5000);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_yaml_file_round_trip() {
        let dir = scratch_dir("yaml");
        let path = dir.join("sample.yaml");
        let mut config = AppConfig::default();
        config.mysql_options.retention_hours = Some(72);
        config.to_file(&path).unwrap();

        let loaded = AppConfig::from_file(&path).unwrap();
        assert_eq!(loaded.mysql_options.retention_hours, Some(72));
        assert_eq!(loaded.topics, config.topics);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_validate_rejects_duplicate_topics_and_empty_pools() {
        let mut config = AppConfig::default();
        config.topics.push(config.topics[0].clone());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.influx.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.topics[1].consumers = 0;
        assert!(config.validate().is_err());
    }
}
