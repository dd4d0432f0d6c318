//! The Topology Broadcaster: derives the canonical
//! `TopologySnapshot` from watched lease and health keys and publishes it by
//! pointer swap over a `tokio::sync::watch` channel.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use pgfleet_consensus::keys::{health_prefix, last_segment, lease_key, lease_prefix, HealthValue};
use pgfleet_consensus::ConsensusStore;
use pgfleet_types::{GroupId, GroupView, NodeId, Role, TopologySnapshot};

use crate::error::TopologyError;

/// Static group membership, supplied by configuration. This crate never
/// discovers membership on its own; a node absent from every health report
/// but present here is reported `dead`, not silently dropped.
#[derive(Debug, Clone)]
pub struct GroupMembership {
    pub group_id: GroupId,
    pub members: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct TopologyBroadcasterConfig {
    pub groups: Vec<GroupMembership>,
    /// Fallback recompute interval used when the underlying watches are
    /// disconnected (`T_probe * 2`).
    pub poll_interval: Duration,
}

pub struct TopologyBroadcaster<C> {
    store: C,
    config: TopologyBroadcasterConfig,
    current_tx: watch::Sender<Arc<TopologySnapshot>>,
}

impl<C> TopologyBroadcaster<C>
where
    C: ConsensusStore + Clone,
{
    pub fn new(store: C, config: TopologyBroadcasterConfig) -> Self {
        let (current_tx, _rx) = watch::channel(Arc::new(TopologySnapshot::empty(now_nanos())));
        Self {
            store,
            config,
            current_tx,
        }
    }

    /// Subscribes to the broadcaster's published snapshot. The receiver
    /// always observes the latest snapshot; it may skip intermediates.
    pub fn subscribe(&self) -> watch::Receiver<Arc<TopologySnapshot>> {
        self.current_tx.subscribe()
    }

    pub fn current(&self) -> Arc<TopologySnapshot> {
        self.current_tx.borrow().clone()
    }

    /// Runs until `shutdown` fires. Watches `/group/*` and `/health/*` for
    /// triggers to recompute; falls back to polling at `poll_interval` if the
    /// watches disconnect.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        self.recompute_and_publish().await;

        loop {
            let mut lease_stream = match self.store.watch(&lease_prefix(), 0).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(error = %err, "topology broadcaster could not open lease watch, polling");
                    self.poll_until_shutdown(&mut shutdown).await;
                    return;
                }
            };
            let mut health_stream = match self.store.watch(&health_prefix_root(), 0).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(error = %err, "topology broadcaster could not open health watch, polling");
                    self.poll_until_shutdown(&mut shutdown).await;
                    return;
                }
            };

            loop {
                tokio::select! {
                    event = lease_stream.next() => {
                        if event.is_none() {
                            warn!("lease watch disconnected, reopening");
                            break;
                        }
                        self.recompute_and_publish().await;
                    }
                    event = health_stream.next() => {
                        if event.is_none() {
                            warn!("health watch disconnected, reopening");
                            break;
                        }
                        self.recompute_and_publish().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn poll_until_shutdown(&self, shutdown: &mut watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.recompute_and_publish().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn recompute_and_publish(&self) {
        match self.recompute().await {
            Ok(snapshot) => {
                let current = self.current_tx.borrow().clone();
                if snapshot.supersedes(&current) {
                    debug!(version = snapshot.version, "publishing new topology snapshot");
                    let _ = self.current_tx.send(Arc::new(snapshot));
                } else {
                    debug!(
                        candidate_version = snapshot.version,
                        current_version = current.version,
                        "discarding stale or non-superseding snapshot"
                    );
                }
            }
            Err(err) => warn!(error = %err, "failed to recompute topology snapshot"),
        }
    }

    async fn recompute(&self) -> Result<TopologySnapshot, TopologyError> {
        let observed_revision = self.store.now().await;
        let prev_version = self.current_tx.borrow().version;

        let mut groups = BTreeMap::new();
        for membership in &self.config.groups {
            let view = self.recompute_group(membership).await?;
            groups.insert(membership.group_id.clone(), view);
        }

        Ok(TopologySnapshot {
            version: prev_version.max(observed_revision),
            groups,
            issued_at: now_nanos(),
        })
    }

    async fn recompute_group(&self, membership: &GroupMembership) -> Result<GroupView, TopologyError> {
        let now = now_nanos();
        let leader = self
            .store
            .get(&lease_key(&membership.group_id))
            .await?
            .and_then(|versioned| pgfleet_consensus::keys::LeaseValue::decode(&versioned.value).ok())
            .filter(|decoded| decoded.is_live(now))
            .map(|decoded| (decoded.node_id, decoded.epoch));

        let reports = self.read_health_reports(&membership.group_id).await?;

        let mut in_sync = Vec::new();
        let mut lagging = Vec::new();
        let mut dead = Vec::new();
        let mut seen = BTreeSet::new();

        for (node_id, report) in reports {
            seen.insert(node_id.clone());
            match report.role {
                Role::StandbyInSync => in_sync.push((node_id, report.lag_bytes)),
                Role::StandbyLagging => lagging.push(node_id),
                Role::Unreachable | Role::Unknown => dead.push(node_id),
                Role::Primary => {}
            }
        }

        for node_id in &membership.members {
            let is_leader = leader.as_ref().is_some_and(|(leader_id, _)| leader_id == node_id);
            if !seen.contains(node_id) && !is_leader {
                dead.push(node_id.clone());
            }
        }

        in_sync.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));

        Ok(GroupView {
            leader,
            in_sync: in_sync.into_iter().map(|(node_id, _)| node_id).collect(),
            lagging,
            dead,
        })
    }

    /// Reads every currently-live `HealthReport` under the group's health
    /// prefix via `scan_live`, so a node whose report lease has lapsed
    /// (crashed, stopped publishing) drops out here rather than lingering
    /// forever under a stale `watch` replay.
    async fn read_health_reports(&self, group_id: &GroupId) -> Result<Vec<(NodeId, HealthValue)>, TopologyError> {
        let prefix = health_prefix(group_id);
        let live = self.store.scan_live(&prefix).await?;
        let mut by_node = BTreeMap::new();
        for (key, versioned) in live {
            if let Some(node) = last_segment(&key) {
                if let Ok(decoded) = HealthValue::decode(&versioned.value) {
                    by_node.insert(node.to_string(), decoded);
                }
            }
        }
        Ok(by_node.into_iter().map(|(node, value)| (NodeId::new(node), value)).collect())
    }
}

fn health_prefix_root() -> String {
    pgfleet_consensus::keys::health_root_prefix()
}

fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgfleet_consensus::keys::{health_key, HealthValue, LeaseValue};
    use pgfleet_consensus::MemoryStore;
    use pgfleet_types::Epoch;

    fn config(groups: Vec<GroupMembership>) -> TopologyBroadcasterConfig {
        TopologyBroadcasterConfig {
            groups,
            poll_interval: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn recompute_classifies_leader_in_sync_and_dead_nodes() {
        let store = MemoryStore::new();
        let group = GroupId::new("g1");

        let lease = LeaseValue {
            node_id: NodeId::new("a"),
            epoch: Epoch::new(3),
            expires_at: i64::MAX,
        };
        store.put(&lease_key(&group), lease.encode(), None).await.unwrap();

        let in_sync_report = HealthValue {
            role: Role::StandbyInSync,
            lag_bytes: 10,
            wal_position: 100,
            observed_at: 0,
        };
        store
            .put(&health_key(&group, &NodeId::new("b")), in_sync_report.encode(), None)
            .await
            .unwrap();

        let membership = GroupMembership {
            group_id: group.clone(),
            members: vec![NodeId::new("a"), NodeId::new("b"), NodeId::new("c")],
        };
        let broadcaster = TopologyBroadcaster::new(store, config(vec![membership]));

        let snapshot = broadcaster.recompute().await.unwrap();
        let view = snapshot.group(&group).unwrap();
        assert_eq!(view.leader, Some((NodeId::new("a"), Epoch::new(3))));
        assert_eq!(view.in_sync, vec![NodeId::new("b")]);
        assert_eq!(view.dead, vec![NodeId::new("c")]);
    }

    #[tokio::test]
    async fn a_node_whose_health_lease_expired_is_reclassified_dead() {
        let store = MemoryStore::new();
        let group = GroupId::new("g1");

        let report = HealthValue {
            role: Role::StandbyInSync,
            lag_bytes: 0,
            wal_position: 10,
            observed_at: 0,
        };
        let lease = store.grant_lease(Duration::from_millis(10)).await.unwrap();
        store
            .put(&health_key(&group, &NodeId::new("b")), report.encode(), Some(lease))
            .await
            .unwrap();

        let membership = GroupMembership {
            group_id: group.clone(),
            members: vec![NodeId::new("b")],
        };
        let broadcaster = TopologyBroadcaster::new(store, config(vec![membership]));

        let snapshot = broadcaster.recompute().await.unwrap();
        assert_eq!(snapshot.group(&group).unwrap().in_sync, vec![NodeId::new("b")]);

        tokio::time::sleep(Duration::from_millis(30)).await;

        let snapshot = broadcaster.recompute().await.unwrap();
        let view = snapshot.group(&group).unwrap();
        assert!(view.in_sync.is_empty());
        assert_eq!(view.dead, vec![NodeId::new("b")]);
    }

    #[tokio::test]
    async fn publish_refuses_to_demote_a_higher_epoch_leader() {
        let store = MemoryStore::new();
        let group = GroupId::new("g1");
        let membership = GroupMembership {
            group_id: group.clone(),
            members: vec![NodeId::new("a")],
        };
        let broadcaster = TopologyBroadcaster::new(store, config(vec![membership]));

        let mut stale = TopologySnapshot::empty(0);
        stale.version = 100;
        let mut view = GroupView::default();
        view.leader = Some((NodeId::new("a"), Epoch::new(9)));
        stale.groups.insert(group.clone(), view);
        broadcaster.current_tx.send(Arc::new(stale)).unwrap();

        broadcaster.recompute_and_publish().await;

        assert_eq!(broadcaster.current().version, 100);
    }
}
