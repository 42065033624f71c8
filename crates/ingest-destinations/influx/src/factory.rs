use crate::{InfluxBackend, InfluxConfig};
use ingest_core::BackendFactory;

pub struct InfluxBackendFactory {
    config: InfluxConfig,
}

impl InfluxBackendFactory {
    pub fn new(config: InfluxConfig) -> Self {
        Self { config }
    }
}

impl BackendFactory for InfluxBackendFactory {
    type Backend = InfluxBackend;

    fn name(&self) -> &str {
        "influx"
    }

    fn create(&self, database: &str) -> InfluxBackend {
        InfluxBackend::new(self.config.clone(), database)
    }
}
