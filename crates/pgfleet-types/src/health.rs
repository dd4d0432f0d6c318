use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, NodeId};

/// Nanoseconds since the Unix epoch. Kept as a raw integer rather than a
/// calendar type so this crate stays free of a time-library dependency;
/// callers that need calendar arithmetic convert at their own boundary.
pub type UnixNanos = i64;

/// Locally observed role of a database endpoint, per the classification
/// rules evaluated in order: unreachable, primary, in-sync standby, lagging
/// standby, unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Primary,
    StandbyInSync,
    StandbyLagging,
    Unreachable,
    Unknown,
}

impl Role {
    /// The one-byte wire code used in the `/health/<G>/<N>` value layout.
    pub const fn wire_code(self) -> u8 {
        match self {
            Role::Primary => 0x01,
            Role::StandbyInSync => 0x02,
            Role::StandbyLagging => 0x03,
            Role::Unreachable => 0x04,
            Role::Unknown => 0x05,
        }
    }

    pub const fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Role::Primary),
            0x02 => Some(Role::StandbyInSync),
            0x03 => Some(Role::StandbyLagging),
            0x04 => Some(Role::Unreachable),
            0x05 => Some(Role::Unknown),
            _ => None,
        }
    }

    /// Whether a node reporting this role is eligible to stand for election
    /// (it must be a primary, an in-sync standby, or have been the previous
    /// leader — that last case is decided by the caller, not this type).
    pub const fn is_election_eligible(self) -> bool {
        matches!(self, Role::Primary | Role::StandbyInSync)
    }
}

/// A node's self-reported health, published under `/health/<G>/<N>` with a
/// TTL of `3 * T_probe`. Read by the Topology Broadcaster and the Leader
/// Lease Manager; written only by the Health Monitor for its own node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub node_id: NodeId,
    pub group_id: GroupId,
    pub role: Role,
    pub lag_bytes: u64,
    pub wal_position: u64,
    pub observed_at: UnixNanos,
}

impl HealthReport {
    pub fn new(
        node_id: NodeId,
        group_id: GroupId,
        role: Role,
        lag_bytes: u64,
        wal_position: u64,
        observed_at: UnixNanos,
    ) -> Self {
        Self {
            node_id,
            group_id,
            role,
            lag_bytes,
            wal_position,
            observed_at,
        }
    }

    /// Classifies a standby's lag against the configured thresholds.
    /// `role` must already be known to be in recovery; this only decides
    /// in-sync versus lagging.
    pub fn classify_standby(lag_bytes: u64, lag_seconds: u64, threshold_bytes: u64, threshold_seconds: u64) -> Role {
        if lag_bytes <= threshold_bytes && lag_seconds <= threshold_seconds {
            Role::StandbyInSync
        } else {
            Role::StandbyLagging
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Role::Primary, 0x01)]
    #[test_case(Role::StandbyInSync, 0x02)]
    #[test_case(Role::StandbyLagging, 0x03)]
    #[test_case(Role::Unreachable, 0x04)]
    #[test_case(Role::Unknown, 0x05)]
    fn wire_code_round_trips(role: Role, code: u8) {
        assert_eq!(role.wire_code(), code);
        assert_eq!(Role::from_wire_code(code), Some(role));
    }

    #[test]
    fn unknown_wire_code_rejected() {
        assert_eq!(Role::from_wire_code(0x00), None);
        assert_eq!(Role::from_wire_code(0x06), None);
    }

    #[test]
    fn in_sync_requires_both_thresholds() {
        assert_eq!(
            HealthReport::classify_standby(1024, 1, 16 * 1024 * 1024, 5),
            Role::StandbyInSync
        );
        assert_eq!(
            HealthReport::classify_standby(32 * 1024 * 1024, 1, 16 * 1024 * 1024, 5),
            Role::StandbyLagging
        );
        assert_eq!(
            HealthReport::classify_standby(0, 10, 16 * 1024 * 1024, 5),
            Role::StandbyLagging
        );
    }

    #[test]
    fn only_primary_and_in_sync_are_election_eligible() {
        assert!(Role::Primary.is_election_eligible());
        assert!(Role::StandbyInSync.is_election_eligible());
        assert!(!Role::StandbyLagging.is_election_eligible());
        assert!(!Role::Unreachable.is_election_eligible());
        assert!(!Role::Unknown.is_election_eligible());
    }
}
