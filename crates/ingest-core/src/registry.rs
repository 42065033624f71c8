use crate::{BackendFactory, PoolSettings, WritePool};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Registry of write pools for one backend kind, keyed by destination
/// database name.
///
/// Pools are created on first use and live as long as the registry. The lock
/// covers lookup and pool construction only; construction spawns tasks and
/// never touches the network.
pub struct PoolRegistry<F: BackendFactory> {
    factory: Arc<F>,
    settings: PoolSettings,
    pools: Mutex<HashMap<String, Arc<WritePool<F::Backend>>>>,
}

impl<F: BackendFactory> PoolRegistry<F> {
    pub fn new(factory: Arc<F>, settings: PoolSettings) -> Self {
        Self {
            factory,
            settings,
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<WritePool<F::Backend>>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.pools.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get the pool for `database`, creating it if this is the first request.
    pub fn get_or_create(&self, database: &str) -> Arc<WritePool<F::Backend>> {
        let mut pools = self.lock();
        if let Some(pool) = pools.get(database) {
            return pool.clone();
        }

        let pool = Arc::new(WritePool::new(
            self.factory.as_ref(),
            database,
            &self.settings,
        ));
        pools.insert(database.to_string(), pool.clone());
        pool
    }

    /// Get an existing pool without creating one
    pub fn get(&self, database: &str) -> Option<Arc<WritePool<F::Backend>>> {
        self.lock().get(database).cloned()
    }

    /// List every database that has a pool
    pub fn databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn backend_name(&self) -> &str {
        self.factory.name()
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }
}
