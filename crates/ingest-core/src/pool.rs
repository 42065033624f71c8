use crate::{Backend, BackendFactory, Connection, FlushPolicy, Handler, HandlerStatus, Record, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Per-backend pool sizing and flush thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Number of handlers per destination database
    pub pool_size: usize,

    /// Flush once this many records are buffered
    pub max_batch_size: usize,

    /// Flush once this many seconds have passed since the last flush
    pub max_interval_secs: u64,

    /// Capacity of each handler's input queue
    pub queue_capacity: usize,
}

impl PoolSettings {
    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            max_batch_size: self.max_batch_size.max(1),
            max_interval: Duration::from_secs(self.max_interval_secs),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            pool_size: 80,
            max_batch_size: 100,
            max_interval_secs: 10,
            queue_capacity: 100,
        }
    }
}

/// Fixed set of handlers serving one destination database, plus one
/// connection of its own for statements outside the write path.
pub struct WritePool<B: Backend> {
    database: String,
    handlers: Vec<Handler<B>>,
    cursor: AtomicUsize,
    statements: Arc<Connection<B>>,
}

impl<B: Backend> WritePool<B> {
    /// Build every handler up front and start their flush loops.
    pub fn new<F>(factory: &F, database: &str, settings: &PoolSettings) -> Self
    where
        F: BackendFactory<Backend = B> + ?Sized,
    {
        let policy = settings.flush_policy();
        let handlers = (0..settings.pool_size.max(1))
            .map(|index| {
                Handler::spawn(
                    index,
                    factory.create(database),
                    policy,
                    settings.queue_capacity,
                )
            })
            .collect::<Vec<_>>();

        info!(
            backend = factory.name(),
            database,
            handlers = handlers.len(),
            "Write pool created"
        );

        Self {
            database: database.to_string(),
            handlers,
            cursor: AtomicUsize::new(0),
            statements: Arc::new(Connection::new(factory.create(database))),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Next handler in round-robin order. Safe to call from many tasks.
    fn next_handler(&self) -> &Handler<B> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.handlers.len();
        &self.handlers[index]
    }

    /// Hand a record to the next handler, waiting while its queue is full.
    pub async fn submit(&self, record: Record) -> Result<()> {
        self.next_handler().enqueue(record).await
    }

    /// Connection for DDL and lookups. It belongs to the pool, not to a
    /// handler, so using it never moves the write cursor or stalls a flush.
    pub fn connection(&self) -> Arc<Connection<B>> {
        self.statements.clone()
    }

    /// Counters summed over every handler.
    pub fn status(&self) -> HandlerStatus {
        self.handlers
            .iter()
            .map(Handler::status)
            .fold(HandlerStatus::default(), |mut acc, s| {
                acc.records_written += s.records_written;
                acc.records_dropped += s.records_dropped;
                acc.batches_written += s.batches_written;
                acc.batches_failed += s.batches_failed;
                acc
            })
    }

    /// Counters of each handler, in handler order.
    pub fn handler_statuses(&self) -> Vec<HandlerStatus> {
        self.handlers.iter().map(Handler::status).collect()
    }

    /// Records sitting in handler queues.
    pub fn queued(&self) -> usize {
        self.handlers.iter().map(Handler::queued).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{record, seq_of, MockFactory};

    fn settings(pool_size: usize, max_batch_size: usize) -> PoolSettings {
        PoolSettings {
            pool_size,
            max_batch_size,
            max_interval_secs: 3600,
            queue_capacity: 64,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_robin_is_even_and_cyclic() {
        let factory = MockFactory::default();
        let observer = factory.observer();
        // One record per batch, so every batch maps to exactly one enqueue.
        let pool = WritePool::new(&factory, "db", &settings(3, 1));
        assert_eq!(pool.handler_count(), 3);
        // One backend per handler plus the statement connection
        assert_eq!(factory.created(), 4);

        for seq in 0..12 {
            pool.submit(record("db", seq)).await.unwrap();
        }
        observer.wait_for_batches(12).await;

        let status = pool.status();
        assert_eq!(status.records_written, 12);
        for handler in pool.handler_statuses() {
            assert_eq!(handler.records_written, 4);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_receives_its_cyclic_share() {
        let factory = MockFactory::default();
        let observer = factory.observer();
        let pool = WritePool::new(&factory, "db", &settings(2, 3));

        for seq in 0..6 {
            pool.submit(record("db", seq)).await.unwrap();
        }
        observer.wait_for_batches(2).await;

        let mut batches: Vec<Vec<i64>> = observer
            .batches()
            .iter()
            .map(|b| b.iter().map(seq_of).collect())
            .collect();
        batches.sort();
        assert_eq!(batches, vec![vec![0, 2, 4], vec![1, 3, 5]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_statement_connection_does_not_stall_writes() {
        let factory = MockFactory::default().with_connect_delay(Duration::from_millis(500));
        let observer = factory.observer();
        let pool = Arc::new(WritePool::new(&factory, "db", &settings(1, 1)));

        let ddl = pool.connection();
        let opening = tokio::spawn(async move { ddl.session().await.map(|_| ()) });
        tokio::task::yield_now().await;

        pool.submit(record("db", 1)).await.unwrap();
        observer.wait_for_batches(1).await;
        opening.await.unwrap().unwrap();

        assert_eq!(
            pool.status(),
            HandlerStatus {
                records_written: 1,
                records_dropped: 0,
                batches_written: 1,
                batches_failed: 0,
            }
        );
        assert_eq!(observer.connects(), 2);
    }

    #[tokio::test]
    async fn test_zero_pool_size_still_has_a_handler() {
        let factory = MockFactory::default();
        let pool = WritePool::new(&factory, "db", &settings(0, 10));
        assert_eq!(pool.handler_count(), 1);
    }
}
