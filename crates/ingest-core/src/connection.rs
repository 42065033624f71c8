use crate::{Backend, Error, Result};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

impl ConnectionStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionStatus::Initializing,
            2 => ConnectionStatus::Ready,
            3 => ConnectionStatus::Failed,
            _ => ConnectionStatus::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionStatus::Uninitialized => 0,
            ConnectionStatus::Initializing => 1,
            ConnectionStatus::Ready => 2,
            ConnectionStatus::Failed => 3,
        }
    }
}

/// Marks an abandoned bring-up as failed. If the `init` future is dropped
/// while `open` is pending, the status must not stay `Initializing`.
struct BringUp<'a> {
    status: &'a AtomicU8,
    finished: bool,
}

impl Drop for BringUp<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.status
                .store(ConnectionStatus::Failed.as_u8(), Ordering::Release);
        }
    }
}

/// Lazily opened wrapper around one backend session.
///
/// Status reads are lock-free. Transitions out of `Uninitialized` and
/// `Failed` happen under `init_lock`, and only one caller at a time may run
/// the bring-up. `Failed` is retryable: the next `init` tries again.
pub struct Connection<B: Backend> {
    backend: B,
    status: AtomicU8,
    init_lock: Mutex<()>,
    session: OnceLock<B::Session>,
}

impl<B: Backend> Connection<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            status: AtomicU8::new(ConnectionStatus::Uninitialized.as_u8()),
            init_lock: Mutex::new(()),
            session: OnceLock::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    /// Bring the connection up if it is not ready yet.
    ///
    /// Never waits on another caller's bring-up: if one is in flight this
    /// returns [`Error::Initializing`] straight away.
    pub async fn init(&self) -> Result<()> {
        match self.status() {
            ConnectionStatus::Ready => return Ok(()),
            ConnectionStatus::Initializing => {
                return Err(Error::Initializing(self.backend.database().to_string()))
            }
            _ => {}
        }

        let Ok(_guard) = self.init_lock.try_lock() else {
            return Err(Error::Initializing(self.backend.database().to_string()));
        };

        // Re-check: the previous holder may have finished between the status
        // read and the lock.
        match self.status() {
            ConnectionStatus::Ready => return Ok(()),
            ConnectionStatus::Initializing => {
                return Err(Error::Initializing(self.backend.database().to_string()))
            }
            _ => {}
        }

        self.set_status(ConnectionStatus::Initializing);
        let mut bring_up = BringUp {
            status: &self.status,
            finished: false,
        };
        debug!(
            backend = self.backend.name(),
            database = self.backend.database(),
            "Opening connection"
        );

        let opened = self.backend.open().await;
        bring_up.finished = true;

        match opened {
            Ok(session) => {
                // Ready is terminal, so the session is only ever set once.
                let _ = self.session.set(session);
                self.set_status(ConnectionStatus::Ready);
                info!(
                    backend = self.backend.name(),
                    database = self.backend.database(),
                    "Connection ready"
                );
                Ok(())
            }
            Err(e) => {
                self.set_status(ConnectionStatus::Failed);
                warn!(
                    backend = self.backend.name(),
                    database = self.backend.database(),
                    "Connection failed: {}",
                    e
                );
                Err(match e {
                    Error::Connection(msg) => Error::Connection(msg),
                    other => Error::Connection(other.to_string()),
                })
            }
        }
    }

    /// Initialise if needed and return the live session.
    pub async fn session(&self) -> Result<&B::Session> {
        self.init().await?;
        self.session
            .get()
            .ok_or_else(|| Error::Connection("session missing after init".to_string()))
    }

    /// Write one batch through the backend. The whole batch fails together.
    pub async fn write_batch(&self, records: &[crate::Record]) -> Result<()> {
        let session = self.session().await?;
        self.backend.write_batch(session, records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_init_reaches_ready() {
        let backend = MockBackend::new("db");
        let observer = backend.observer();
        let conn = Connection::new(backend);

        assert_eq!(conn.status(), ConnectionStatus::Uninitialized);
        conn.init().await.unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Ready);

        // Fast path does not reconnect
        conn.init().await.unwrap();
        assert_eq!(observer.connects(), 1);
    }

    #[tokio::test]
    async fn test_failed_is_retryable() {
        let backend = MockBackend::new("db");
        let observer = backend.observer();
        observer.fail_connects(1);
        let conn = Connection::new(backend);

        let err = conn.init().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(conn.status(), ConnectionStatus::Failed);

        conn.init().await.unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Ready);
        assert_eq!(observer.connects(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_init_connects_once() {
        let backend = MockBackend::new("db").with_connect_delay(Duration::from_millis(200));
        let observer = backend.observer();
        let conn = Arc::new(Connection::new(backend));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let conn = conn.clone();
            tasks.push(tokio::spawn(async move { conn.init().await }));
        }

        let mut ready = 0;
        let mut initializing = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => ready += 1,
                Err(Error::Initializing(_)) => initializing += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(observer.connects(), 1);
        assert_eq!(ready + initializing, 16);
        assert!(initializing >= 1);
        assert_eq!(conn.status(), ConnectionStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_init_is_retryable() {
        let backend = MockBackend::new("db").with_connect_delay(Duration::from_secs(10));
        let observer = backend.observer();
        let conn = Connection::new(backend);

        let timed_out = tokio::time::timeout(Duration::from_secs(1), conn.init()).await;
        assert!(timed_out.is_err());
        assert_eq!(conn.status(), ConnectionStatus::Failed);

        conn.init().await.unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Ready);
        assert_eq!(observer.connects(), 2);
    }

    #[tokio::test]
    async fn test_write_batch_initialises_lazily() {
        let backend = MockBackend::new("db");
        let observer = backend.observer();
        let conn = Connection::new(backend);

        let record = crate::mock::record("db", 1);
        conn.write_batch(std::slice::from_ref(&record)).await.unwrap();

        assert_eq!(observer.connects(), 1);
        assert_eq!(observer.batches(), vec![vec![record]]);
    }
}
