//! pgfleet - a distributed control plane for PostgreSQL clusters: leader
//! election, health monitoring, topology broadcast, and connection routing
//! over a shared consensus store.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use error::CliError;

#[derive(Parser)]
#[command(name = "pgfleet")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the control plane process until interrupted.
    Start {
        /// Path to a TOML configuration file. Environment variables
        /// prefixed `PGFLEET_` always take precedence over it.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Loads and validates configuration without starting the process.
    CheckConfig {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// How to print the resolved configuration once it validates.
        #[arg(short, long, value_enum, default_value_t = commands::check_config::OutputFormat::Text)]
        format: commands::check_config::OutputFormat,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PGFLEET_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "pgfleet exiting with an error");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(anyhow::Error::from)?;

    runtime.block_on(async {
        match cli.command {
            Commands::Start { config } => commands::start::run(config.as_deref()).await,
            Commands::CheckConfig { config, format } => commands::check_config::run(config.as_deref(), format),
        }
    })
}
