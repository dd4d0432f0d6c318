//! The Leader Lease Manager's state machine.

/// States of a single group's per-node lease manager. `Leader` carries the
/// consensus-store revision the lease was last written at, so renewal can be
/// expressed as a compare-and-swap against exactly that revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Follower,
    Candidate,
    Leader(u64),
    Demoting,
    Stopped,
}

impl LeaseState {
    pub const fn is_leader(self) -> bool {
        matches!(self, LeaseState::Leader(_))
    }
}
