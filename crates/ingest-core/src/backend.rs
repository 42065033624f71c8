use crate::{FieldValue, Fields, Record, Result};
use async_trait::async_trait;

/// A storage backend bound to one destination database.
///
/// `open` does the expensive bring-up (connect, create the database if it is
/// missing) and hands back a session. Sessions are cheap handles that can be
/// cloned and used from any task.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Session: Clone + Send + Sync + 'static;

    /// Backend kind, used in log lines
    fn name(&self) -> &str;

    /// Destination database this backend writes into
    fn database(&self) -> &str;

    /// Connect and make sure the destination database exists
    async fn open(&self) -> Result<Self::Session>;

    /// Write all records in one backend call. Either the whole batch lands or
    /// the call fails.
    async fn write_batch(&self, session: &Self::Session, records: &[Record]) -> Result<()>;
}

/// Backends that also accept raw statements and point lookups.
#[async_trait]
pub trait RelationalBackend: Backend {
    async fn execute(&self, session: &Self::Session, statement: &str) -> Result<()>;

    /// Run a query with positional parameters and return its first row keyed
    /// by column name, or `None` when nothing matched.
    async fn query_row(
        &self,
        session: &Self::Session,
        query: &str,
        params: &[FieldValue],
    ) -> Result<Option<Fields>>;
}

/// Builds backend instances for a destination database.
///
/// A pool calls `create` once per handler so every handler owns an
/// independent connection.
pub trait BackendFactory: Send + Sync + 'static {
    type Backend: Backend;

    /// Get the name/type identifier for the backends this factory builds
    fn name(&self) -> &str;

    fn create(&self, database: &str) -> Self::Backend;
}
