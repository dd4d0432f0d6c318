//! The Topology Broadcaster: derives the canonical,
//! version-numbered `TopologySnapshot` from consensus-store lease and
//! health state and fans it out to subscribers by pointer swap.

mod broadcaster;
mod error;

pub use broadcaster::{GroupMembership, TopologyBroadcaster, TopologyBroadcasterConfig};
pub use error::TopologyError;
