//! `pgfleet check-config` - loads and validates configuration without
//! starting the process, for use in deploy-time smoke tests.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::info;

use crate::error::CliError;

/// Output format for the validated, fully-resolved configuration.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Toml,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::Toml => "toml",
        })
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "toml" => Ok(OutputFormat::Toml),
            other => Err(format!("unknown format {other:?}, expected text, json, or toml")),
        }
    }
}

pub fn run(config_path: Option<&Path>, format: OutputFormat) -> Result<(), CliError> {
    let config = super::load_config(config_path)?;
    info!(
        node_id = %config.node_id,
        cluster_id = %config.cluster_id,
        groups = config.groups.len(),
        "configuration is valid"
    );

    match format {
        OutputFormat::Text => {
            println!(
                "configuration is valid: node={} cluster={} groups={}",
                config.node_id,
                config.cluster_id,
                config.groups.len()
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&config).map_err(anyhow::Error::from)?);
        }
        OutputFormat::Toml => {
            println!("{}", toml::to_string_pretty(&config).map_err(anyhow::Error::from)?);
        }
    }
    Ok(())
}
