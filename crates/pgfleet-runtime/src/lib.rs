//! Wires the Consensus Client, Health Monitor, Leader Lease Manager,
//! Topology Broadcaster, and Connection Router/Pool into one supervised
//! process, plus the ambient metrics registry.

mod error;
mod runtime;

pub use error::RuntimeError;
pub use pgfleet_metrics::Metrics;
pub use runtime::Runtime;
