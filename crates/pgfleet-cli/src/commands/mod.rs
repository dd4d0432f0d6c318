pub mod check_config;
pub mod start;

use std::path::Path;

use pgfleet_config::{ConfigLoader, PgfleetConfig};

use crate::error::CliError;

/// Loads and validates configuration from an optional TOML file plus
/// `PGFLEET_`-prefixed environment variables, the latter always winning.
fn load_config(config_path: Option<&Path>) -> Result<PgfleetConfig, CliError> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = config_path {
        loader = loader.with_file(path);
    }
    Ok(loader.load()?)
}
