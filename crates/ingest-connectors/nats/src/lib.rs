mod nats_connector;

pub use nats_connector::{NatsConfig, NatsConnector};
