//! In-memory backends for unit tests.

use crate::{
    Backend, BackendFactory, Error, FieldValue, Fields, Record, RelationalBackend, Result, Tags,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct ObserverState {
    connects: AtomicUsize,
    failing_connects: AtomicUsize,
    failing_writes: AtomicUsize,
    batches: Mutex<Vec<Vec<Record>>>,
    statements: Mutex<Vec<String>>,
    rows: Mutex<Vec<(String, Fields)>>,
    queries: Mutex<Vec<(String, Vec<FieldValue>)>>,
    written: Notify,
}

/// Shared view into what a [`MockBackend`] has been asked to do.
#[derive(Clone, Default)]
pub struct Observer {
    state: Arc<ObserverState>,
}

impl Observer {
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn fail_connects(&self, n: usize) {
        self.state.failing_connects.store(n, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, n: usize) {
        self.state.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Every batch handed to `write_batch`, failed ones included.
    pub fn batches(&self) -> Vec<Vec<Record>> {
        self.state.batches.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.statements.lock().unwrap().clone()
    }

    /// Answer any query containing `fragment` with `row`.
    pub fn respond(&self, fragment: &str, row: Fields) {
        self.state
            .rows
            .lock()
            .unwrap()
            .push((fragment.to_string(), row));
    }

    /// Every lookup run through `query_row`, with its parameters.
    pub fn queries(&self) -> Vec<(String, Vec<FieldValue>)> {
        self.state.queries.lock().unwrap().clone()
    }

    /// Wait until at least `n` batches have been attempted.
    pub async fn wait_for_batches(&self, n: usize) {
        loop {
            let notified = self.state.written.notified();
            if self.state.batches.lock().unwrap().len() >= n {
                return;
            }
            notified.await;
        }
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub struct MockBackend {
    database: String,
    connect_delay: Duration,
    observer: Observer,
}

impl MockBackend {
    pub fn new(database: &str) -> Self {
        Self::with_observer(database, Observer::default())
    }

    pub fn with_observer(database: &str, observer: Observer) -> Self {
        Self {
            database: database.to_string(),
            connect_delay: Duration::ZERO,
            observer,
        }
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn observer(&self) -> Observer {
        self.observer.clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    type Session = ();

    fn name(&self) -> &str {
        "mock"
    }

    fn database(&self) -> &str {
        &self.database
    }

    async fn open(&self) -> Result<()> {
        self.observer.state.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if take_one(&self.observer.state.failing_connects) {
            return Err(Error::Connection("mock refused".to_string()));
        }
        Ok(())
    }

    async fn write_batch(&self, _session: &(), records: &[Record]) -> Result<()> {
        self.observer
            .state
            .batches
            .lock()
            .unwrap()
            .push(records.to_vec());
        self.observer.state.written.notify_waiters();
        if take_one(&self.observer.state.failing_writes) {
            return Err(Error::Write("mock write failed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RelationalBackend for MockBackend {
    async fn execute(&self, _session: &(), statement: &str) -> Result<()> {
        self.observer
            .state
            .statements
            .lock()
            .unwrap()
            .push(statement.to_string());
        Ok(())
    }

    async fn query_row(
        &self,
        _session: &(),
        query: &str,
        params: &[FieldValue],
    ) -> Result<Option<Fields>> {
        self.observer
            .state
            .queries
            .lock()
            .unwrap()
            .push((query.to_string(), params.to_vec()));
        let rows = self.observer.state.rows.lock().unwrap();
        Ok(rows
            .iter()
            .find(|(fragment, _)| query.contains(fragment.as_str()))
            .map(|(_, row)| row.clone()))
    }
}

/// Factory handing out mock backends that all report to the same observer.
#[derive(Default)]
pub struct MockFactory {
    observer: Observer,
    created: AtomicUsize,
    connect_delay: Duration,
}

impl MockFactory {
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn observer(&self) -> Observer {
        self.observer.clone()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl BackendFactory for MockFactory {
    type Backend = MockBackend;

    fn name(&self) -> &str {
        "mock"
    }

    fn create(&self, database: &str) -> MockBackend {
        self.created.fetch_add(1, Ordering::SeqCst);
        MockBackend::with_observer(database, self.observer.clone()).with_connect_delay(self.connect_delay)
    }
}

/// A point whose single field carries `seq`, so ordering can be checked.
pub fn record(database: &str, seq: i64) -> Record {
    let mut fields = Fields::new();
    fields.insert("seq".to_string(), FieldValue::Integer(seq));
    Record::new(
        database,
        "m",
        Tags::new(),
        fields,
        Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
    )
    .unwrap()
}

pub fn seq_of(record: &Record) -> i64 {
    match record.fields().get("seq") {
        Some(FieldValue::Integer(v)) => *v,
        _ => -1,
    }
}
