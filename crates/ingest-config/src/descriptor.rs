use ingest_core::{Error, Result};

/// Relational server address and credentials, `host:port@user/password`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlDescriptor {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Time-series server address, `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxDescriptor {
    pub host: String,
    pub port: u16,
}

fn parse_address(input: &str, what: &str) -> Result<(String, u16)> {
    let (host, port) = input
        .split_once(':')
        .ok_or_else(|| Error::Configuration(format!("{} address '{}' is not host:port", what, input)))?;
    if host.is_empty() || port.contains(':') {
        return Err(Error::Configuration(format!(
            "{} address '{}' is not host:port",
            what, input
        )));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::Configuration(format!("{} port '{}' is not a number", what, port)))?;
    Ok((host.to_string(), port))
}

impl MysqlDescriptor {
    pub fn parse(input: &str) -> Result<Self> {
        let (address, credentials) = input.split_once('@').ok_or_else(|| {
            Error::Configuration(format!("MySQL descriptor '{}' has no '@'", input))
        })?;
        let (host, port) = parse_address(address, "MySQL")?;

        // The password may itself contain '/' or '@'
        let (username, password) = credentials.split_once('/').ok_or_else(|| {
            Error::Configuration("MySQL credentials are not user/password".to_string())
        })?;
        if username.is_empty() {
            return Err(Error::Configuration("MySQL user is empty".to_string()));
        }

        Ok(Self {
            host,
            port,
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

impl InfluxDescriptor {
    pub fn parse(input: &str) -> Result<Self> {
        let (host, port) = parse_address(input, "InfluxDB")?;
        Ok(Self { host, port })
    }
}

/// Split a `;`-separated broker list, ignoring empty entries.
pub fn parse_broker_list(input: &str) -> Result<Vec<String>> {
    let brokers: Vec<String> = input
        .split(';')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect();
    if brokers.is_empty() {
        return Err(Error::Configuration("broker list is empty".to_string()));
    }
    Ok(brokers)
}
