//! Error types for the Strata context cache.

use std::time::Duration;
use thiserror::Error;

/// A layer or search provider failed to produce items.
///
/// Always recovered locally: the layer falls back to its stale items or yields nothing,
/// and the failure surfaces as a warning on the assembly result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider failed: {0}")]
    Failed(String),

    #[error("Provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("Refresh task aborted before completion")]
    Aborted,
}

impl ProviderError {
    pub fn failed(msg: impl Into<String>) -> Self {
        ProviderError::Failed(msg.into())
    }
}

/// The token estimator could not size a piece of text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Token estimation failed: {0}")]
pub struct EstimatorError(pub String);

/// Configuration-time errors. These are the only errors that abort an operation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

/// Slow tier storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Failed to (de)serialize cache entry: {0}")]
    Codec(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Codec(err.to_string())
    }
}

/// Errors surfaced by the `strata` command-line front end
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to read {path}: {source}")]
    Input {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to render output: {0}")]
    Output(String),
}
