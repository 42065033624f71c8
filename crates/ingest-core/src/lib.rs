mod backend;
mod connection;
mod connector;
mod error;
mod handler;
pub mod message;
mod pipeline;
mod pool;
mod record;
mod registry;
mod resource;
mod router;
mod schema;

#[cfg(test)]
mod mock;

pub use backend::{Backend, BackendFactory, RelationalBackend};
pub use connection::{Connection, ConnectionStatus};
pub use connector::{Connector, ConnectorStatus, InboundMessage};
pub use error::{Error, Result};
pub use handler::{FlushPolicy, Handler, HandlerStatus};
pub use message::MessageKind;
pub use pipeline::{Pipeline, PipelineStatus};
pub use pool::{PoolSettings, WritePool};
pub use record::{FieldValue, Fields, Record, Tags, ValueKind};
pub use registry::PoolRegistry;
pub use resource::{ResourceLookup, RESOURCE_KEYS};
pub use router::{MessageHandler, Router};
pub use schema::{group_by_unit, SchemaDialect, Statement};
