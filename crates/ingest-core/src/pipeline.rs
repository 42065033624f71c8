use crate::{Connector, ConnectorStatus, MessageHandler, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Feeds one connector into a message handler until the stream ends.
pub struct Pipeline {
    name: String,
    connector: Box<dyn Connector>,
    handler: Arc<dyn MessageHandler>,
    routed: u64,
    dropped: u64,
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        connector: Box<dyn Connector>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            connector,
            handler,
            routed: 0,
            dropped: 0,
        }
    }

    /// Start the pipeline
    ///
    /// Receive and routing errors are logged and the message is dropped; only
    /// connect/disconnect failures end the run.
    pub async fn run(&mut self) -> Result<()> {
        info!("[{}] Starting pipeline", self.name);
        self.connector.connect().await?;
        info!("[{}] Connector connected", self.name);

        loop {
            match self.connector.receive().await {
                Ok(Some(message)) => match self.handler.handle(&message).await {
                    Ok(()) => self.routed += 1,
                    Err(e) => {
                        self.dropped += 1;
                        error!(
                            "[{}] Dropping message from '{}': {}",
                            self.name, message.topic, e
                        );
                    }
                },
                Ok(None) => {
                    warn!("[{}] Connector stream closed", self.name);
                    break;
                }
                Err(e) => {
                    self.dropped += 1;
                    error!("[{}] Error receiving message: {}", self.name, e);
                }
            }
        }

        self.connector.disconnect().await?;
        info!(
            "[{}] Pipeline stopped ({} routed, {} dropped)",
            self.name, self.routed, self.dropped
        );
        Ok(())
    }

    pub fn get_status(&self) -> PipelineStatus {
        PipelineStatus {
            connector_status: self.connector.status(),
            routed: self.routed,
            dropped: self.dropped,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub connector_status: ConnectorStatus,
    pub routed: u64,
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, InboundMessage};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedConnector {
        script: VecDeque<Result<InboundMessage>>,
        status: ConnectorStatus,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&mut self) -> Result<()> {
            self.status.connected = true;
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.status.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.status.connected
        }

        async fn receive(&mut self) -> Result<Option<InboundMessage>> {
            self.script.pop_front().transpose()
        }

        fn status(&self) -> ConnectorStatus {
            self.status.clone()
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: &InboundMessage) -> Result<()> {
            if message.payload.is_empty() {
                return Err(Error::Decode("empty".to_string()));
            }
            self.seen.lock().unwrap().push(message.topic.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_errors_do_not_stop_the_pipeline() {
        let connector = ScriptedConnector {
            script: VecDeque::from(vec![
                Ok(InboundMessage::new("a", "x")),
                Err(Error::Connection("blip".to_string())),
                Ok(InboundMessage::new("b", "")),
                Ok(InboundMessage::new("c", "y")),
            ]),
            status: ConnectorStatus::default(),
        };
        let recorder = Arc::new(Recorder::default());
        let mut pipeline = Pipeline::new("test", Box::new(connector), recorder.clone());

        pipeline.run().await.unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["a", "c"]);
        let status = pipeline.get_status();
        assert_eq!(status.routed, 2);
        assert_eq!(status.dropped, 2);
        assert!(!status.connector_status.connected);
    }
}
