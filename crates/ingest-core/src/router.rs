use crate::message::{RelationalCreateTable, RelationalInsert, TimeseriesWrite};
use crate::resource::{next_boot_count, required_text, text};
use crate::{
    BackendFactory, Error, FieldValue, Fields, InboundMessage, MessageKind, PoolRegistry, Record,
    RelationalBackend, ResourceLookup, Result, SchemaDialect, RESOURCE_KEYS,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Something that consumes raw inbound messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &InboundMessage) -> Result<()>;
}

/// Decodes inbound messages and hands the resulting records to the right
/// pool of the right backend, picked by topic.
pub struct Router<R, T>
where
    R: BackendFactory,
    R::Backend: RelationalBackend,
    T: BackendFactory,
{
    relational: Arc<PoolRegistry<R>>,
    timeseries: Arc<PoolRegistry<T>>,
    dialect: Arc<dyn SchemaDialect>,
    topics: HashMap<String, MessageKind>,
    auto_create_tables: bool,
    resource_lookup: ResourceLookup,
    created_tables: Mutex<HashSet<(String, String)>>,
}

impl<R, T> Router<R, T>
where
    R: BackendFactory,
    R::Backend: RelationalBackend,
    T: BackendFactory,
{
    pub fn new(
        relational: Arc<PoolRegistry<R>>,
        timeseries: Arc<PoolRegistry<T>>,
        dialect: Arc<dyn SchemaDialect>,
    ) -> Self {
        Self {
            relational,
            timeseries,
            dialect,
            topics: HashMap::new(),
            auto_create_tables: true,
            resource_lookup: ResourceLookup::default(),
            created_tables: Mutex::new(HashSet::new()),
        }
    }

    /// Route messages published on `topic` as `kind`
    pub fn with_topic(mut self, topic: impl Into<String>, kind: MessageKind) -> Self {
        self.topics.insert(topic.into(), kind);
        self
    }

    /// Infer and create missing tables before the first insert into them
    pub fn with_auto_create_tables(mut self, enabled: bool) -> Self {
        self.auto_create_tables = enabled;
        self
    }

    /// Where server resource reports look up host addresses
    pub fn with_resource_lookup(mut self, lookup: ResourceLookup) -> Self {
        self.resource_lookup = lookup;
        self
    }

    pub fn relational(&self) -> &Arc<PoolRegistry<R>> {
        &self.relational
    }

    pub fn timeseries(&self) -> &Arc<PoolRegistry<T>> {
        &self.timeseries
    }

    pub fn kind_of(&self, topic: &str) -> Option<MessageKind> {
        self.topics.get(topic).copied()
    }

    /// Decode one payload and dispatch it.
    pub async fn route(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let kind = self
            .kind_of(topic)
            .ok_or_else(|| Error::Decode(format!("no route for topic '{}'", topic)))?;

        match kind {
            MessageKind::TimeseriesWrite => {
                let record = TimeseriesWrite::decode(payload)?.into_record()?;
                let pool = self.timeseries.get_or_create(record.destination());
                pool.submit(record).await
            }
            MessageKind::RelationalInsert => {
                let record = RelationalInsert::decode(payload)?.into_record()?;
                if self.auto_create_tables
                    && !self.is_created(record.destination(), record.unit())
                {
                    let statement = self.dialect.infer_schema(&record, &[]);
                    if let Err(e) = self
                        .create_table(record.destination(), record.unit(), &statement.sql)
                        .await
                    {
                        warn!(
                            database = record.destination(),
                            table = record.unit(),
                            "Failed to create table: {}",
                            e
                        );
                    }
                }
                let pool = self.relational.get_or_create(record.destination());
                pool.submit(record).await
            }
            MessageKind::RelationalCreateTable => {
                let msg = RelationalCreateTable::decode(payload)?;
                if self.is_created(&msg.db_name, &msg.table_name) {
                    debug!(
                        database = msg.db_name.as_str(),
                        table = msg.table_name.as_str(),
                        "Table already created, skipping"
                    );
                    return Ok(());
                }
                self.create_table(&msg.db_name, &msg.table_name, &msg.sql)
                    .await
            }
            MessageKind::ServerResource => {
                let record = self
                    .enrich_server_resource(RelationalInsert::decode(payload)?)
                    .await?;
                let pool = self.relational.get_or_create(record.destination());
                pool.submit(record).await
            }
        }
    }

    /// Fill in `ipv4` and `boot_count` for a server inventory report. Lookup
    /// failures are logged and leave the reported values in place.
    async fn enrich_server_resource(&self, msg: RelationalInsert) -> Result<Record> {
        let (database, table, mut fields) = msg.into_parts();
        let hostname = required_text(&fields, "hostname")?;
        let serial_number = required_text(&fields, "serial_number")?;
        let boot_time = text(fields.get("boot_time"));

        fields
            .entry("ipv4".to_string())
            .or_insert_with(|| FieldValue::from(""));
        fields
            .entry("boot_count".to_string())
            .or_insert(FieldValue::Integer(0));

        if !self.is_created(&database, &table) {
            let template = Record::row(database.as_str(), table.as_str(), fields.clone())?;
            let statement = self.dialect.infer_schema(&template, &RESOURCE_KEYS.map(String::from));
            if let Err(e) = self.create_table(&database, &table, &statement.sql).await {
                warn!(
                    database = database.as_str(),
                    table = table.as_str(),
                    "Failed to create table: {}",
                    e
                );
            }
        }

        match self.lookup_address(&hostname).await {
            Ok(Some(address)) => {
                fields.insert("ipv4".to_string(), FieldValue::String(address));
            }
            Ok(None) => warn!(hostname = hostname.as_str(), "No address found for host"),
            Err(e) => warn!(hostname = hostname.as_str(), "Address lookup failed: {}", e),
        }

        let query = self.dialect.select_row(
            &database,
            &table,
            &["boot_time", "boot_count"],
            &RESOURCE_KEYS,
        );
        let params = [FieldValue::String(hostname.clone()), FieldValue::String(serial_number)];
        match self.query_row(&database, &query, &params).await {
            Ok(stored) => {
                let count = next_boot_count(stored.as_ref(), &boot_time);
                fields.insert("boot_count".to_string(), FieldValue::Integer(count));
            }
            Err(e) => warn!(
                hostname = hostname.as_str(),
                "Failed to read boot count: {}", e
            ),
        }

        Record::row(database, table, fields)
    }

    async fn lookup_address(&self, hostname: &str) -> Result<Option<String>> {
        let lookup = &self.resource_lookup;
        let query = self.dialect.select_row(
            &lookup.database,
            &lookup.table,
            &[lookup.address_column.as_str()],
            &[lookup.name_column.as_str()],
        );
        let row = self
            .query_row(&lookup.database, &query, &[FieldValue::from(hostname)])
            .await?;
        Ok(row
            .map(|row| text(row.get(&lookup.address_column)))
            .filter(|address| !address.is_empty()))
    }

    /// Run a point lookup through the database's statement connection.
    async fn query_row(
        &self,
        database: &str,
        query: &str,
        params: &[FieldValue],
    ) -> Result<Option<Fields>> {
        let pool = self.relational.get_or_create(database);
        let connection = pool.connection();
        let session = connection.session().await?;
        connection.backend().query_row(session, query, params).await
    }

    fn created(&self) -> std::sync::MutexGuard<'_, HashSet<(String, String)>> {
        self.created_tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_created(&self, database: &str, table: &str) -> bool {
        self.created()
            .contains(&(database.to_string(), table.to_string()))
    }

    /// Run DDL through the database's statement connection. The table is
    /// only remembered as created once the statement succeeds.
    async fn create_table(&self, database: &str, table: &str, sql: &str) -> Result<()> {
        let pool = self.relational.get_or_create(database);
        let connection = pool.connection();
        let session = connection.session().await?;
        connection.backend().execute(session, sql).await?;

        self.created()
            .insert((database.to_string(), table.to_string()));
        info!(database, table, "Table created");
        Ok(())
    }
}

#[async_trait]
impl<R, T> MessageHandler for Router<R, T>
where
    R: BackendFactory,
    R::Backend: RelationalBackend,
    T: BackendFactory,
{
    async fn handle(&self, message: &InboundMessage) -> Result<()> {
        self.route(&message.topic, &message.payload).await
    }
}
