//! The Health Monitor: per-node probing and classification
//! of a local database endpoint, published to the consensus store.

mod classify;
mod error;
mod monitor;
mod probe;

pub use classify::{classify, LagThresholds};
pub use error::HealthError;
pub use monitor::{HealthMonitor, HealthMonitorConfig, LocalObservation};
pub use probe::{DatabaseProbe, ProbeObservation, ScriptedProbe, StaticProbe};
