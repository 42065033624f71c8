use crate::{MysqlBackend, MysqlConfig};
use ingest_core::BackendFactory;

pub struct MysqlBackendFactory {
    config: MysqlConfig,
}

impl MysqlBackendFactory {
    pub fn new(config: MysqlConfig) -> Self {
        Self { config }
    }
}

impl BackendFactory for MysqlBackendFactory {
    type Backend = MysqlBackend;

    fn name(&self) -> &str {
        "mysql"
    }

    fn create(&self, database: &str) -> MysqlBackend {
        MysqlBackend::new(self.config.clone(), database)
    }
}
