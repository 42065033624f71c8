use crate::{Backend, Connection, Error, Record, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, warn};

/// Dual flush thresholds: whichever fires first drains the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub max_batch_size: usize,
    pub max_interval: Duration,
}

impl FlushPolicy {
    fn should_flush(&self, buffered: usize, last_flush: Instant) -> bool {
        buffered >= self.max_batch_size || last_flush.elapsed() >= self.max_interval
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerStatus {
    pub records_written: u64,
    pub records_dropped: u64,
    pub batches_written: u64,
    pub batches_failed: u64,
}

#[derive(Default)]
struct Counters {
    records_written: AtomicU64,
    records_dropped: AtomicU64,
    batches_written: AtomicU64,
    batches_failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> HandlerStatus {
        HandlerStatus {
            records_written: self.records_written.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
        }
    }
}

/// One connection, one bounded queue, one flush task.
///
/// Producers only enqueue. The buffer and the last-flush time live inside
/// the flush task and nothing else touches them.
pub struct Handler<B: Backend> {
    index: usize,
    connection: Arc<Connection<B>>,
    sender: mpsc::Sender<Record>,
    counters: Arc<Counters>,
}

impl<B: Backend> Handler<B> {
    /// Create the handler and spawn its flush loop on the current runtime.
    pub fn spawn(index: usize, backend: B, policy: FlushPolicy, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let connection = Arc::new(Connection::new(backend));
        let counters = Arc::new(Counters::default());

        let flush_loop = FlushLoop {
            index,
            connection: connection.clone(),
            receiver,
            policy,
            counters: counters.clone(),
        };
        tokio::spawn(flush_loop.run());

        Self {
            index,
            connection,
            sender,
            counters,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn connection(&self) -> &Arc<Connection<B>> {
        &self.connection
    }

    /// Queue a record. Waits while the queue is full.
    pub async fn enqueue(&self, record: Record) -> Result<()> {
        self.sender.send(record).await.map_err(|_| {
            Error::Write(format!(
                "handler {} for '{}' has stopped",
                self.index,
                self.connection.backend().database()
            ))
        })
    }

    /// Records waiting in the queue, not counting the flush buffer.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn status(&self) -> HandlerStatus {
        self.counters.snapshot()
    }
}

struct FlushLoop<B: Backend> {
    index: usize,
    connection: Arc<Connection<B>>,
    receiver: mpsc::Receiver<Record>,
    policy: FlushPolicy,
    counters: Arc<Counters>,
}

impl<B: Backend> FlushLoop<B> {
    async fn run(mut self) {
        let mut buffer: Vec<Record> = Vec::new();
        let mut last_flush = Instant::now();

        loop {
            let received = if buffer.is_empty() {
                self.receiver.recv().await
            } else {
                let deadline = last_flush + self.policy.max_interval;
                tokio::select! {
                    received = self.receiver.recv() => received,
                    _ = sleep_until(deadline) => {
                        self.flush(std::mem::take(&mut buffer)).await;
                        last_flush = Instant::now();
                        continue;
                    }
                }
            };

            match received {
                Some(record) => {
                    buffer.push(record);
                    if self.policy.should_flush(buffer.len(), last_flush) {
                        self.flush(std::mem::take(&mut buffer)).await;
                        last_flush = Instant::now();
                    }
                }
                None => {
                    // Every sender is gone, so the pool itself was dropped.
                    if !buffer.is_empty() {
                        self.flush(std::mem::take(&mut buffer)).await;
                    }
                    debug!(handler = self.index, "Flush loop stopped");
                    break;
                }
            }
        }
    }

    /// Write one batch. Failures drop the batch: there is no retry queue.
    async fn flush(&self, batch: Vec<Record>) {
        let count = batch.len();
        let database = self.connection.backend().database();

        match self.connection.write_batch(&batch).await {
            Ok(()) => {
                self.counters
                    .records_written
                    .fetch_add(count as u64, Ordering::Relaxed);
                self.counters.batches_written.fetch_add(1, Ordering::Relaxed);
                debug!(handler = self.index, database, "Flushed {} records", count);
            }
            Err(e) => {
                self.counters
                    .records_dropped
                    .fetch_add(count as u64, Ordering::Relaxed);
                self.counters.batches_failed.fetch_add(1, Ordering::Relaxed);
                if e.is_transient() {
                    warn!(
                        handler = self.index,
                        database, "Dropped {} records, backend not ready: {}", count, e
                    );
                } else {
                    error!(
                        handler = self.index,
                        database, "Failed to flush {} records: {}", count, e
                    );
                }
            }
        }
    }
}
