//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    ReadError { path: PathBuf, source: std::io::Error },

    #[error("failed to build configuration: {0}")]
    BuildError(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}
