mod factory;
mod influx_destination;
pub mod line_protocol;

pub use factory::InfluxBackendFactory;
pub use influx_destination::{InfluxBackend, InfluxConfig, InfluxSession};
