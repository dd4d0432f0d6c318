//! The `DatabaseProbe` capability: everything the Health Monitor needs from
//! the local database endpoint, and nothing else. The SQL layer itself is
//! an external collaborator; this trait is the only seam.

use std::future::Future;

use crate::error::HealthError;

/// A single probe's raw result, before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeObservation {
    /// The database reports itself as writable (i.e. primary).
    pub writable: bool,
    /// The database reports itself as being in recovery (standby).
    pub in_recovery: bool,
    pub lag_bytes: u64,
    pub lag_seconds: u64,
    pub wal_position: u64,
}

/// Probes a single local database endpoint. Implementations perform
/// whatever protocol round-trip is required (e.g. `pg_is_in_recovery()`,
/// replication lag views); this crate only consumes the result.
pub trait DatabaseProbe: Send + Sync + 'static {
    fn probe(&self) -> impl Future<Output = Result<ProbeObservation, HealthError>> + Send;
}

/// A probe driven by a scripted sequence of outcomes, used by tests in this
/// workspace in place of a live database connection.
pub struct ScriptedProbe {
    outcomes: tokio::sync::Mutex<std::collections::VecDeque<Result<ProbeObservation, HealthError>>>,
}

impl ScriptedProbe {
    pub fn new(outcomes: Vec<Result<ProbeObservation, HealthError>>) -> Self {
        Self {
            outcomes: tokio::sync::Mutex::new(outcomes.into()),
        }
    }
}

impl DatabaseProbe for ScriptedProbe {
    async fn probe(&self) -> Result<ProbeObservation, HealthError> {
        let mut outcomes = self.outcomes.lock().await;
        outcomes
            .pop_front()
            .unwrap_or(Err(HealthError::ConnectFailed("scripted probe exhausted".into())))
    }
}

/// A probe that always reports the same fixed observation. Used when no
/// real database connection is wired up (local/single-node runs); unlike
/// `ScriptedProbe` it never runs dry, so it is safe to use for the lifetime
/// of a long-running process instead of only in a test.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe {
    observation: ProbeObservation,
}

impl StaticProbe {
    pub const fn new(observation: ProbeObservation) -> Self {
        Self { observation }
    }

    /// A probe that always reports a healthy, lag-free primary.
    pub const fn always_primary() -> Self {
        Self::new(ProbeObservation {
            writable: true,
            in_recovery: false,
            lag_bytes: 0,
            lag_seconds: 0,
            wal_position: 0,
        })
    }
}

impl DatabaseProbe for StaticProbe {
    async fn probe(&self) -> Result<ProbeObservation, HealthError> {
        Ok(self.observation)
    }
}
