use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::health::UnixNanos;
use crate::ids::{Epoch, GroupId, NodeId};

/// The view of one replication group inside a `TopologySnapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupView {
    /// `None` when no live, unexpired lease is observed for this group.
    pub leader: Option<(NodeId, Epoch)>,
    /// In-sync replicas, ordered by (lag ascending, `NodeId` ascending) as
    /// they were when this snapshot was assembled.
    pub in_sync: Vec<NodeId>,
    pub lagging: Vec<NodeId>,
    /// Missing reports or reports marked `Unreachable`.
    pub dead: Vec<NodeId>,
}

impl GroupView {
    pub fn is_known_replica(&self, node: &NodeId) -> bool {
        self.in_sync.contains(node) || self.lagging.contains(node)
    }
}

/// An immutable, version-numbered view of the entire cluster, the sole
/// source of routing truth for the Connection Router/Pool. `version` is
/// strictly increasing; a snapshot with `version <= current` must never
/// replace the one already applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub version: u64,
    pub groups: BTreeMap<GroupId, GroupView>,
    pub issued_at: UnixNanos,
}

impl TopologySnapshot {
    pub fn empty(issued_at: UnixNanos) -> Self {
        Self {
            version: 0,
            groups: BTreeMap::new(),
            issued_at,
        }
    }

    pub fn group(&self, id: &GroupId) -> Option<&GroupView> {
        self.groups.get(id)
    }

    pub fn leader_of(&self, id: &GroupId) -> Option<(NodeId, Epoch)> {
        self.groups.get(id).and_then(|g| g.leader.clone())
    }

    /// Whether `self` is safe to apply on top of `current`: strictly newer,
    /// and never demoting a group whose leader epoch it already recorded at
    /// a strictly greater epoch (stale-read protection).
    pub fn supersedes(&self, current: &TopologySnapshot) -> bool {
        if self.version <= current.version {
            return false;
        }
        for (group_id, prev_view) in &current.groups {
            let Some((_, prev_epoch)) = &prev_view.leader else {
                continue;
            };
            let next_epoch = self.groups.get(group_id).and_then(|v| v.leader.as_ref()).map(|(_, e)| *e);
            let demoted = match next_epoch {
                Some(e) => e < *prev_epoch,
                None => true,
            };
            if demoted {
                return false;
            }
        }
        true
    }
}

/// Health classification of an upstream from the pool's perspective,
/// independent of what the Health Monitor reports: the circuit breaker can
/// mark an otherwise-healthy node `Unhealthy` after consecutive I/O failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpstreamHealth {
    Healthy,
    Draining,
    Unhealthy,
}

/// A database node as seen by the pool: endpoint, role at the last applied
/// snapshot, health state, and live connection accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamView {
    pub node_id: NodeId,
    pub endpoint: String,
    pub health: UpstreamHealth,
    pub live_connections: usize,
    pub max_connections: usize,
}

impl UpstreamView {
    pub fn load_weight(&self) -> f64 {
        1.0 / (1.0 + self.live_connections as f64)
    }

    pub fn has_capacity(&self) -> bool {
        self.live_connections < self.max_connections
    }
}
