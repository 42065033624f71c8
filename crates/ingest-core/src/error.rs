use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// Another caller is bringing the connection up. Retry on the next flush.
    #[error("Connection to '{0}' is already initializing")]
    Initializing(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// True for outcomes that clear up on their own on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Initializing(_) | Error::Connection(_))
    }
}
