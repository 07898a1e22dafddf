//! Error types for accrete

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Robots.txt disallowed: {0}")]
    RobotsDisallowed(String),

    #[error("Adapter error: {0}")]
    Adapter(String),

    #[error("Deadline exceeded after {0}s")]
    Deadline(u64),

    #[error("Store write failed: {0}")]
    StoreTransient(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Root {0} is locked by another process (remove the lock file if it is stale)")]
    Locked(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Adapter(format!("{:#}", err))
    }
}

/// Result type alias for accrete
pub type Result<T> = std::result::Result<T, Error>;
