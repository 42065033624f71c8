use clap::{Parser, Subcommand};
use ingest_config::{
    parse_broker_list, AppConfig, InfluxDescriptor, LoggingConfig, MysqlDescriptor, BROKER_ENV,
    INFLUX_SERVER_ENV, MYSQL_SERVER_ENV,
};
use ingest_core::{BackendFactory, MessageHandler, Pipeline, PoolRegistry, Router};
use ingest_influx_destination::{InfluxBackendFactory, InfluxConfig};
use ingest_mysql_destination::{MysqlBackendFactory, MysqlConfig, MysqlDialect};
use ingest_nats_connector::{NatsConfig, NatsConnector};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ingest-cli")]
#[command(about = "Buffered MySQL / InfluxDB ingest service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume the configured topics and write them out
    Start {
        /// Path to configuration directory
        #[arg(short, long, default_value = "config")]
        config_dir: String,

        /// Broker addresses, separated by ';'
        #[arg(long, env = BROKER_ENV)]
        broker: String,

        /// MySQL server as host:port@user/password
        #[arg(long, env = MYSQL_SERVER_ENV)]
        mysql: String,

        /// InfluxDB server as host:port
        #[arg(long, env = INFLUX_SERVER_ENV)]
        influx: String,
    },

    /// Validate configuration files
    Validate {
        /// Path to configuration directory
        #[arg(short, long, default_value = "config")]
        config_dir: String,
    },

    /// Write the built-in defaults to a YAML file
    Init {
        #[arg(default_value = "config/default.yaml")]
        path: String,
    },
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))
}

fn log_pools<F: BackendFactory>(registry: &PoolRegistry<F>) {
    for database in registry.databases() {
        if let Some(pool) = registry.get(&database) {
            let status = pool.status();
            info!(
                backend = registry.backend_name(),
                database = database.as_str(),
                handlers = pool.handler_count(),
                queued = pool.queued(),
                written = status.records_written,
                dropped = status.records_dropped,
                failed_batches = status.batches_failed,
                "Pool status"
            );
        }
    }
}

async fn start(
    config_dir: &str,
    broker: &str,
    mysql: &str,
    influx: &str,
) -> anyhow::Result<()> {
    let app_config = AppConfig::load(config_dir)?;
    init_tracing(&app_config.logging)?;

    info!("Starting ingest with config directory: {}", config_dir);

    let brokers = parse_broker_list(broker)?;
    let mysql = MysqlDescriptor::parse(mysql)?;
    let influx = InfluxDescriptor::parse(influx)?;

    let options = &app_config.mysql_options;
    let mysql_factory = MysqlBackendFactory::new(MysqlConfig {
        host: mysql.host,
        port: mysql.port,
        username: mysql.username,
        password: mysql.password,
        max_connections: options.max_connections,
        conn_max_lifetime_secs: options.conn_max_lifetime_secs,
        retention_hours: options.retention_hours,
    });
    let influx_factory = InfluxBackendFactory::new(InfluxConfig {
        host: influx.host,
        port: influx.port,
        timeout_secs: app_config.influx_options.timeout_secs,
    });

    let relational = Arc::new(PoolRegistry::new(Arc::new(mysql_factory), app_config.mysql));
    let timeseries = Arc::new(PoolRegistry::new(Arc::new(influx_factory), app_config.influx));

    let router = app_config.topics.iter().fold(
        Router::new(relational.clone(), timeseries.clone(), Arc::new(MysqlDialect::new()))
            .with_auto_create_tables(options.auto_create_tables)
            .with_resource_lookup(app_config.server_resource.clone()),
        |router, topic| router.with_topic(topic.name.clone(), topic.kind),
    );
    let handler: Arc<dyn MessageHandler> = Arc::new(router);

    let mut tasks = Vec::new();
    for topic in &app_config.topics {
        for n in 0..topic.consumers {
            let connector = NatsConnector::new(NatsConfig {
                servers: brokers.clone(),
                subject: topic.name.clone(),
                group_id: topic.group_id.clone(),
                ..NatsConfig::default()
            });
            info!(
                topic = topic.name.as_str(),
                group = topic.group_id.as_str(),
                id = connector.consumer_id(),
                "Consumer registered"
            );

            let mut pipeline = Pipeline::new(
                format!("{}#{}", topic.name, n),
                Box::new(connector),
                handler.clone(),
            );
            tasks.push(tokio::spawn(async move {
                if let Err(e) = pipeline.run().await {
                    error!("Pipeline failed: {}", e);
                }
            }));
        }
    }

    info!("Ingest started with {} consumer(s)", tasks.len());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down ingest...");

    for task in &tasks {
        task.abort();
    }
    log_pools(&relational);
    log_pools(&timeseries);

    Ok(())
}

fn validate(config_dir: &str) -> anyhow::Result<()> {
    let config = AppConfig::load(config_dir)?;

    println!("Configuration in {} is valid", config_dir);
    for (name, settings) in [("mysql", &config.mysql), ("influx", &config.influx)] {
        println!(
            "  {}: {} handler(s), batch {}, interval {}s, queue {}",
            name,
            settings.pool_size,
            settings.max_batch_size,
            settings.max_interval_secs,
            settings.queue_capacity
        );
    }

    println!("\nTopics: {}", config.topics.len());
    for topic in &config.topics {
        println!(
            "  {} ({:?}, group {}, {} consumer(s))",
            topic.name, topic.kind, topic.group_id, topic.consumers
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            config_dir,
            broker,
            mysql,
            influx,
        } => start(&config_dir, &broker, &mysql, &influx).await?,
        Commands::Validate { config_dir } => validate(&config_dir)?,
        Commands::Init { path } => {
            AppConfig::default().to_file(&path)?;
            println!("Wrote default configuration to {}", path);
        }
    }

    Ok(())
}
