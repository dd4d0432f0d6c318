//! `pgfleet start` - runs the Consensus Client, Health Monitor, Leader
//! Lease Manager, Topology Broadcaster, and Connection Router/Pool as one
//! process until interrupted.
//!
//! This build ships `MemoryStore` as its only `ConsensusStore` and
//! `StaticProbe` as its only `DatabaseProbe`: a real deployment supplies a
//! client for its actual consensus backend and a probe that issues
//! `pg_is_in_recovery()`-equivalent checks, neither of which is this
//! crate's concern. Running `start` as shipped is a single-node, in-memory
//! configuration useful for exercising routing and election locally, the
//! same role this codebase's cluster tooling plays for its own server.

use std::path::Path;

use tracing::info;

use pgfleet_consensus::MemoryStore;
use pgfleet_health::StaticProbe;
use pgfleet_router::TcpUpstream;
use pgfleet_runtime::Runtime;

use crate::error::CliError;

pub async fn run(config_path: Option<&Path>) -> Result<(), CliError> {
    let config = super::load_config(config_path)?;
    info!(node_id = %config.node_id, cluster_id = %config.cluster_id, "starting pgfleet");

    let store = MemoryStore::new();
    let probe = StaticProbe::always_primary();
    let backend = TcpUpstream;

    let runtime = Runtime::new(store, probe, backend, config).await?;
    let handles = runtime.start().await?;

    tokio::signal::ctrl_c().await.map_err(anyhow::Error::from)?;
    info!("received shutdown signal, draining");

    runtime.shutdown(handles).await;
    info!("shutdown complete");
    Ok(())
}
