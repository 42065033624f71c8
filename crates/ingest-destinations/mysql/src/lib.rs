mod dialect;
mod factory;
mod mysql_destination;

pub use dialect::{sanitize_identifier, MysqlDialect};
pub use factory::MysqlBackendFactory;
pub use mysql_destination::{MysqlBackend, MysqlConfig};
