use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("consensus store error: {0}")]
    Store(#[from] pgfleet_consensus::ConsensusError),
}
