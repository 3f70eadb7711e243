//! Error types for the rebalancer.

use std::path::PathBuf;

use stratbook_broker::BrokerError;

/// All errors that can occur during rebalancer operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("strategy error: {0}")]
    Strategy(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("gateway error: {0}")]
    Gateway(#[from] BrokerError),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("failed to read import file {path}: {source}")]
    ImportRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse import JSON: {0}")]
    ImportParse(#[from] serde_json::Error),

    #[error("execution aborted: {0}")]
    Aborted(String),

    #[error("audit log error: {0}")]
    Audit(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
