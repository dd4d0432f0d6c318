//! Runtime-level errors, each carrying the process exit code
//! `pgfleet-cli` maps it to.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("configuration error: {0}")]
    Config(#[from] pgfleet_config::ConfigError),

    /// This node's configured `cluster_id` does not match the one already
    /// recorded in the consensus store. Refuses to start rather than risk
    /// mixing two clusters' lease/health state.
    #[error("cluster id mismatch: configured {configured}, consensus store has {recorded}")]
    ClusterIdMismatch { configured: String, recorded: String },

    /// The consensus store did not become reachable within the startup
    /// grace period.
    #[error("consensus store unavailable at startup: {0}")]
    ConsensusUnavailable(#[from] pgfleet_consensus::ConsensusError),

    #[error("listener bind failed: {0}")]
    Io(#[from] std::io::Error),

    /// An internal invariant was violated. Not expected to be recoverable;
    /// the process exits rather than continue in an unknown state.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl RuntimeError {
    /// The process exit code this error maps to.
    pub const fn exit_code(&self) -> i32 {
        match self {
            RuntimeError::Config(_) => 64,
            RuntimeError::ClusterIdMismatch { .. } => 65,
            RuntimeError::ConsensusUnavailable(_) => 69,
            RuntimeError::Io(_) => 69,
            RuntimeError::Invariant(_) => 70,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec_table() {
        assert_eq!(
            RuntimeError::ClusterIdMismatch {
                configured: "a".into(),
                recorded: "b".into()
            }
            .exit_code(),
            65
        );
        assert_eq!(RuntimeError::Invariant("two leaders".into()).exit_code(), 70);
    }
}
