//! Layered configuration loading: compiled-in defaults, an optional TOML
//! file, then environment variables prefixed `PGFLEET_` with `__` as the
//! nested-field separator, in that precedence order, lowest to highest.

use std::path::{Path, PathBuf};

use crate::{ConfigError, PgfleetConfig};

pub struct ConfigLoader {
    file_path: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file_path: None,
            env_prefix: "PGFLEET".to_string(),
        }
    }

    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Builds and validates the final configuration. Unknown fields in the
    /// TOML file are rejected by `PgfleetConfig`'s `deny_unknown_fields`
    /// deserialization; this is a config error (exit code 64), never a
    /// silently-ignored typo.
    pub fn load(self) -> Result<PgfleetConfig, ConfigError> {
        let mut builder = config::Config::builder();

        let defaults = PgfleetConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        if let Some(path) = &self.file_path {
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let built = builder.build()?;
        let loaded: PgfleetConfig = built.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
