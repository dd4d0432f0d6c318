//! Maps every error this binary can produce to its process exit code.
//! `anyhow`-wrapped errors (argument parsing, I/O ahead of configuration
//! loading) fall back to a generic failure exit.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] pgfleet_config::ConfigError),

    #[error(transparent)]
    Runtime(#[from] pgfleet_runtime::RuntimeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) => 64,
            CliError::Runtime(err) => err.exit_code() as u8,
            CliError::Other(_) => 1,
        }
    }
}
