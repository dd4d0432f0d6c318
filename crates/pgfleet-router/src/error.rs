//! Errors surfaced by the Connection Router/Pool. `NoPrimary`,
//! `NoReplica`, `PoolFull`, and `TopologyChanged` are client-visible; `Io`
//! is handled locally (circuit breaker, retry); `Fatal` is never surfaced
//! and the process exits with a nonzero exit code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    /// Waited `wait_for_primary` with no leader for the target group.
    #[error("no primary available for group {group}")]
    NoPrimary { group: String },

    /// No in-sync replica available and fallback-to-primary is disabled.
    #[error("no replica available for group {group}")]
    NoReplica { group: String },

    /// Waited `enqueue_timeout` without an upstream slot becoming free.
    #[error("upstream pool full for {node}")]
    PoolFull { node: String },

    /// The session's upstream was marked draining by a topology change; the
    /// client is expected to reconnect.
    #[error("topology changed, reconnect required")]
    TopologyChanged,

    /// Neither side produced any bytes for `idle_timeout`; the connection
    /// was closed rather than held open indefinitely.
    #[error("connection idle for longer than the configured idle_timeout")]
    IdleTimeout,

    /// The forward was aborted because the session's stamped epoch is
    /// older than the highest epoch this pool has observed for the group
    /// (the fencing invariant: a demoted leader must never be able to commit).
    #[error("stale epoch {stamped} for group {group}, current epoch is {current}")]
    StaleEpoch { group: String, stamped: u64, current: u64 },

    #[error("upstream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An invariant was violated (e.g. two leaders observed at the same
    /// epoch). Callers map this to the process exit code.
    #[error("invariant violation: {0}")]
    Fatal(String),
}

impl RouterError {
    /// Whether this error should be reported to the client rather than
    /// just logged and retried locally.
    pub const fn is_client_visible(&self) -> bool {
        matches!(
            self,
            RouterError::NoPrimary { .. }
                | RouterError::NoReplica { .. }
                | RouterError::PoolFull { .. }
                | RouterError::TopologyChanged
                | RouterError::StaleEpoch { .. }
                | RouterError::IdleTimeout
        )
    }
}
