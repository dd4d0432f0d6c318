//! The Leader Lease Manager: per-group, per-node competition
//! for and renewal of the leader lease, two-phase WAL-ordered election, and
//! graceful demotion on lease loss.

mod election;
mod error;
mod llm;
mod state;

pub use election::{decide_winner, propose_wal, read_proposals, Proposal};
pub use error::ElectionError;
pub use llm::{DatabaseControl, LeaderLeaseConfig, LeaderLeaseManager, SessionDrainCoordinator};
pub use state::LeaseState;
