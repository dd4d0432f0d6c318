//! Shared identifiers and value types for the pgfleet control plane.
//!
//! This crate holds only data: no I/O, no async runtime, no consensus-store
//! access. Every other crate in the workspace depends on it.

mod health;
mod ids;
mod lease;
mod session;
mod topology;

pub use health::{HealthReport, Role, UnixNanos};
pub use ids::{Epoch, GroupId, NodeId};
pub use lease::Lease;
pub use session::{ClientIntent, ClientSession};
pub use topology::{GroupView, TopologySnapshot, UpstreamHealth, UpstreamView};
