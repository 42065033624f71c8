use async_nats::{Client, Subscriber};
use async_trait::async_trait;
use futures::StreamExt;
use ingest_core::{Connector, ConnectorStatus, Error, InboundMessage, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server addresses, `host:port` or full URLs
    pub servers: Vec<String>,

    /// Subject to subscribe to
    pub subject: String,

    /// Queue group; every consumer in the group shares the subject's messages
    pub group_id: String,

    /// Optional username for authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password for authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Optional token for authentication
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            subject: "influx_write".to_string(),
            group_id: "ingest".to_string(),
            username: None,
            password: None,
            token: None,
        }
    }
}

impl NatsConfig {
    /// Server list in the comma-separated form the client accepts
    pub fn server_list(&self) -> String {
        self.servers.join(",")
    }
}

pub struct NatsConnector {
    config: NatsConfig,
    consumer_id: String,
    client: Option<Client>,
    subscriber: Option<Subscriber>,
    status: ConnectorStatus,
}

impl NatsConnector {
    pub fn new(config: NatsConfig) -> Self {
        let consumer_id = format!("{}_{}", config.group_id, Uuid::new_v4());
        Self {
            config,
            consumer_id,
            client: None,
            subscriber: None,
            status: ConnectorStatus::default(),
        }
    }

    /// Client name announced to the server, unique per connector
    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    /// Count a failure in the status and hand the error back.
    fn record_error(&mut self, err: Error) -> Error {
        warn!("NATS consumer '{}': {}", self.consumer_id, err);
        self.status.errors += 1;
        self.status.last_error = Some(err.to_string());
        err
    }

    async fn open_subscription(
        config: &NatsConfig,
        consumer_id: &str,
    ) -> Result<(Client, Subscriber)> {
        if config.servers.is_empty() {
            return Err(Error::Configuration("No NATS servers configured".to_string()));
        }
        info!("Connecting to NATS servers: {:?}", config.servers);

        let mut opts = async_nats::ConnectOptions::new().name(consumer_id.to_string());

        if let Some(ref username) = config.username {
            if let Some(ref password) = config.password {
                info!("Using username/password authentication");
                opts = opts.user_and_password(username.clone(), password.clone());
            }
        } else if let Some(ref token) = config.token {
            info!("Using token authentication");
            opts = opts.token(token.clone());
        }

        let client = opts
            .connect(config.server_list().as_str())
            .await
            .map_err(|e| Error::Connection(format!("Failed to connect to NATS: {}", e)))?;

        info!(
            "Subscribing to subject '{}' with group '{}' as '{}'",
            config.subject, config.group_id, consumer_id
        );
        let subscriber = client
            .queue_subscribe(config.subject.clone(), config.group_id.clone())
            .await
            .map_err(|e| Error::Connection(format!("Failed to subscribe: {}", e)))?;

        Ok((client, subscriber))
    }
}

#[async_trait]
impl Connector for NatsConnector {
    async fn connect(&mut self) -> Result<()> {
        let opened = Self::open_subscription(&self.config, &self.consumer_id).await;
        let (client, subscriber) = match opened {
            Ok(opened) => opened,
            Err(e) => return Err(self.record_error(e)),
        };

        self.status.last_error = None;
        self.client = Some(client);
        self.subscriber = Some(subscriber);
        self.status.connected = true;

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting '{}' from NATS", self.consumer_id);

        if let Some(mut subscriber) = self.subscriber.take() {
            // Already-closed subscriptions have nothing to release
            let _ = subscriber.unsubscribe().await;
        }

        if let Some(client) = self.client.take() {
            client
                .flush()
                .await
                .map_err(|e| Error::Connection(format!("Failed to flush: {}", e)))?;
        }

        self.status.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.status.connected
    }

    async fn receive(&mut self) -> Result<Option<InboundMessage>> {
        let Some(subscriber) = self.subscriber.as_mut() else {
            return Err(self.record_error(Error::Connection("Not connected".to_string())));
        };

        match subscriber.next().await {
            Some(msg) => {
                debug!(
                    "Received message on '{}': {} bytes",
                    msg.subject,
                    msg.payload.len()
                );
                self.status.messages_received += 1;
                Ok(Some(InboundMessage::new(msg.subject.to_string(), msg.payload)))
            }
            None => {
                info!("NATS subscription closed");
                self.status.connected = false;
                Ok(None)
            }
        }
    }

    fn status(&self) -> ConnectorStatus {
        self.status.clone()
    }
}
