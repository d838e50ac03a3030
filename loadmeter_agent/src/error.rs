//! Error types for request validation, telemetry reads and runs.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {0}")]
    Parse(String),

    #[error("{0} handle lock poisoned")]
    Poisoned(&'static str),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("sampling task failed: {0}")]
    Sampling(String),

    #[error("failed to join load workers: {0}")]
    Join(String),
}
