use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// A raw message as it came off the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Trait for message sources
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to the message source
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the message source
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if the connector is connected
    fn is_connected(&self) -> bool;

    /// Receive the next message
    /// Returns None if the stream is closed
    async fn receive(&mut self) -> Result<Option<InboundMessage>>;

    /// Get connector status information
    fn status(&self) -> ConnectorStatus;
}

#[derive(Debug, Clone, Default)]
pub struct ConnectorStatus {
    pub connected: bool,
    pub messages_received: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}
