//! Consensus-store error types.

use thiserror::Error;

/// Result type for consensus-store operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Errors a `ConsensusStore` implementation can report. These map directly to
/// the failure modes listed for the Consensus Client: `Unavailable` is
/// retryable with bounded backoff, `Conflict` tells the caller to re-read and
/// re-decide, `LeaseExpired` is never retried in place.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The store could not be reached or did not answer in time. Retryable.
    #[error("consensus store unavailable: {0}")]
    Unavailable(String),

    /// A compare-and-swap or expected-revision delete did not match current
    /// state. The caller must re-read before deciding what to do next.
    #[error("conflict on key {key}: expected revision {expected:?}, actual {actual:?}")]
    Conflict {
        key: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// The lease backing a `KeepAlive` or `Put` no longer exists. Callers
    /// must re-acquire; never retried in place.
    #[error("lease expired: {0}")]
    LeaseExpired(u64),

    /// The requested key has no value.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The watch stream has been closed by the store and cannot be resumed
    /// from the requested revision because it has fallen out of retention.
    #[error("watch on {prefix} could not resume from revision {from_revision}")]
    WatchCompacted { prefix: String, from_revision: u64 },
}

impl ConsensusError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConsensusError::Unavailable(_))
    }
}
