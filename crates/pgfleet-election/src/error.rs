use thiserror::Error;

/// Error kinds surfaced by the Leader Lease Manager. These mirror the
/// taxonomy below: `Transient`/`Conflict` are handled locally by
/// retrying or re-reading; `LeaseLost` unwinds to `Demoting` and is never
/// retried in place.
#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("consensus store error: {0}")]
    Store(#[from] pgfleet_consensus::ConsensusError),

    #[error("local database refused demotion: {0}")]
    DemotionFailed(String),
}
