//! The Connection Router/Pool's core: turns a `(GroupId, ClientIntent)` plus
//! the current `TopologySnapshot` into a concrete upstream and a bounded
//! connection slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use pgfleet_election::{DatabaseControl, ElectionError, SessionDrainCoordinator};
use pgfleet_metrics::Metrics;
use pgfleet_types::{ClientIntent, Epoch, GroupId, NodeId, TopologySnapshot};

use crate::circuit::CircuitBreaker;
use crate::error::RouterError;
use crate::pool::{PoolPermit, UpstreamPool};
use crate::selection::WeightedRoundRobin;

/// Static per-group endpoint membership, supplied by configuration. Mirrors
/// `pgfleet_topology::GroupMembership` but keyed by endpoint since the
/// router, unlike the broadcaster, has to actually dial these nodes.
#[derive(Debug, Clone)]
pub struct RouterGroupConfig {
    pub group_id: GroupId,
    pub members: HashMap<NodeId, String>,
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub groups: Vec<RouterGroupConfig>,
    pub max_per_upstream: usize,
    pub max_client_connections: usize,
    pub enqueue_timeout: Duration,
    pub wait_for_primary: Duration,
    pub read_only_fallback_to_primary: bool,
    /// How long a client/upstream forwarding session may go without either
    /// side producing a byte before it is closed (`T_idle`). Checked inside
    /// the forwarding loop itself, not by a background sweep over idle pool
    /// slots.
    pub idle_timeout: Duration,
}

/// The upstream and fencing token a routing decision resolved to.
#[derive(Debug, Clone)]
pub struct SelectedUpstream {
    pub node_id: NodeId,
    pub endpoint: String,
    pub epoch: Option<Epoch>,
}

struct UpstreamEntry {
    endpoint: String,
    pool: UpstreamPool,
    breaker: CircuitBreaker,
    /// Set by `DatabaseControl::demote` for the node this process is
    /// co-located with: excludes it from selection until the next snapshot
    /// confirms it is no longer this group's leader.
    locally_demoted: AtomicBool,
}

struct GroupState {
    members: HashMap<NodeId, UpstreamEntry>,
    round_robin: WeightedRoundRobin,
    reject_new_writes: AtomicBool,
    write_sessions_in_flight: AtomicUsize,
}

/// Owns the bounded per-upstream pools and circuit breakers for every
/// configured group, and resolves routing decisions against whatever
/// `TopologySnapshot` is currently live.
pub struct Router {
    snapshot: watch::Receiver<Arc<TopologySnapshot>>,
    groups: HashMap<GroupId, GroupState>,
    config: RouterConfig,
    metrics: Arc<Metrics>,
}

impl Router {
    pub fn new(snapshot: watch::Receiver<Arc<TopologySnapshot>>, config: RouterConfig, metrics: Arc<Metrics>) -> Self {
        let groups = config
            .groups
            .iter()
            .map(|group| {
                let members = group
                    .members
                    .iter()
                    .map(|(node_id, endpoint)| {
                        let entry = UpstreamEntry {
                            endpoint: endpoint.clone(),
                            pool: UpstreamPool::new(config.max_per_upstream, config.max_client_connections, metrics.clone()),
                            breaker: CircuitBreaker::new(metrics.clone()),
                            locally_demoted: AtomicBool::new(false),
                        };
                        (node_id.clone(), entry)
                    })
                    .collect();
                let state = GroupState {
                    members,
                    round_robin: WeightedRoundRobin::new(),
                    reject_new_writes: AtomicBool::new(false),
                    write_sessions_in_flight: AtomicUsize::new(0),
                };
                (group.group_id.clone(), state)
            })
            .collect();
        Self {
            snapshot,
            groups,
            config,
            metrics,
        }
    }

    fn current_snapshot(&self) -> Arc<TopologySnapshot> {
        self.snapshot.borrow().clone()
    }

    fn group_state(&self, group_id: &GroupId) -> Result<&GroupState, RouterError> {
        self.groups.get(group_id).ok_or_else(|| RouterError::Fatal(format!("unconfigured group {group_id}")))
    }

    /// Resolves `(group_id, intent)` against the current topology, waiting
    /// up to `wait_for_primary` for a write intent if no leader is known yet.
    pub async fn route(&self, group_id: &GroupId, intent: ClientIntent) -> Result<SelectedUpstream, RouterError> {
        match intent {
            ClientIntent::ReadWrite => self.route_write(group_id).await,
            ClientIntent::ReadOnly => self.route_read(group_id, self.config.read_only_fallback_to_primary),
            ClientIntent::Any => self.route_read(group_id, true),
        }
    }

    async fn route_write(&self, group_id: &GroupId) -> Result<SelectedUpstream, RouterError> {
        let state = self.group_state(group_id)?;
        let deadline = tokio::time::Instant::now() + self.config.wait_for_primary;
        let mut snapshot_rx = self.snapshot.clone();

        loop {
            if !state.reject_new_writes.load(Ordering::Acquire) {
                if let Some(selected) = self.leader_candidate(group_id, &self.current_snapshot())? {
                    return Ok(selected);
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(RouterError::NoPrimary { group: group_id.to_string() });
            }
            if tokio::time::timeout(remaining, snapshot_rx.changed()).await.is_err() {
                return Err(RouterError::NoPrimary { group: group_id.to_string() });
            }
        }
    }

    fn leader_candidate(&self, group_id: &GroupId, snapshot: &TopologySnapshot) -> Result<Option<SelectedUpstream>, RouterError> {
        let state = self.group_state(group_id)?;
        let Some((node_id, epoch)) = snapshot.leader_of(group_id) else {
            return Ok(None);
        };
        let Some(entry) = state.members.get(&node_id) else {
            return Ok(None);
        };
        if entry.breaker.is_open() || entry.locally_demoted.load(Ordering::Acquire) {
            return Ok(None);
        }
        Ok(Some(SelectedUpstream {
            node_id,
            endpoint: entry.endpoint.clone(),
            epoch: Some(epoch),
        }))
    }

    fn route_read(&self, group_id: &GroupId, fallback_to_primary: bool) -> Result<SelectedUpstream, RouterError> {
        let snapshot = self.current_snapshot();
        let state = self.group_state(group_id)?;
        let view = snapshot
            .group(group_id)
            .ok_or_else(|| RouterError::NoReplica { group: group_id.to_string() })?;

        let candidates: Vec<(NodeId, f64)> = view
            .in_sync
            .iter()
            .filter_map(|node_id| {
                let entry = state.members.get(node_id)?;
                if entry.breaker.is_open() || entry.locally_demoted.load(Ordering::Acquire) {
                    return None;
                }
                let weight = 1.0 / (1.0 + entry.pool.live_connections() as f64);
                Some((node_id.clone(), weight))
            })
            .collect();

        if let Some(node_id) = state.round_robin.select(&candidates) {
            let entry = &state.members[&node_id];
            return Ok(SelectedUpstream {
                node_id,
                endpoint: entry.endpoint.clone(),
                epoch: None,
            });
        }

        if fallback_to_primary {
            if let Some(selected) = self.leader_candidate(group_id, &snapshot)? {
                return Ok(selected);
            }
        }

        Err(RouterError::NoReplica { group: group_id.to_string() })
    }

    /// Acquires a bounded connection slot for `selected`, fencing it against
    /// `stamped_epoch` (if any) first.
    pub async fn acquire(&self, group_id: &GroupId, selected: &SelectedUpstream) -> Result<PoolPermit<'_>, RouterError> {
        self.check_fencing(group_id, selected.epoch)?;
        let state = self.group_state(group_id)?;
        let entry = state
            .members
            .get(&selected.node_id)
            .ok_or_else(|| RouterError::Fatal(format!("unconfigured upstream {}", selected.node_id)))?;
        entry.pool.acquire(selected.node_id.as_str(), self.config.enqueue_timeout).await
    }

    /// Rejects a forward whose stamped epoch is older than the group's
    /// current leader epoch (the fencing invariant). Reads are
    /// unfenced: `stamped_epoch` is `None`.
    pub fn check_fencing(&self, group_id: &GroupId, stamped_epoch: Option<Epoch>) -> Result<(), RouterError> {
        let Some(stamped) = stamped_epoch else {
            return Ok(());
        };
        let snapshot = self.current_snapshot();
        let current = snapshot.leader_of(group_id).map(|(_, epoch)| epoch).unwrap_or(Epoch::ZERO);
        if stamped < current {
            return Err(RouterError::StaleEpoch {
                group: group_id.to_string(),
                stamped: stamped.get(),
                current: current.get(),
            });
        }
        Ok(())
    }

    pub fn record_success(&self, group_id: &GroupId, node_id: &NodeId) {
        if let Some(entry) = self.groups.get(group_id).and_then(|g| g.members.get(node_id)) {
            entry.breaker.record_success();
        }
    }

    pub fn record_failure(&self, group_id: &GroupId, node_id: &NodeId) {
        if let Some(entry) = self.groups.get(group_id).and_then(|g| g.members.get(node_id)) {
            entry.breaker.record_failure();
        }
    }

    fn begin_write_session(&self, group_id: &GroupId) {
        if let Some(state) = self.groups.get(group_id) {
            state.write_sessions_in_flight.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn end_write_session(&self, group_id: &GroupId) {
        if let Some(state) = self.groups.get(group_id) {
            state.write_sessions_in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// RAII tracker for a write-intent session's `write_sessions_in_flight`
/// accounting, so `drain_write_sessions` can observe when it is safe to stop
/// waiting.
pub struct WriteSessionGuard {
    router: Arc<Router>,
    group_id: GroupId,
}

impl WriteSessionGuard {
    pub fn new(router: Arc<Router>, group_id: GroupId) -> Self {
        router.begin_write_session(&group_id);
        Self { router, group_id }
    }
}

impl Drop for WriteSessionGuard {
    fn drop(&mut self) {
        self.router.end_write_session(&self.group_id);
    }
}

/// Implements the Leader Lease Manager's `SessionDrainCoordinator` seam
/// against one group's `Router` state.
pub struct GroupSessionGate {
    router: Arc<Router>,
    group_id: GroupId,
}

impl GroupSessionGate {
    pub fn new(router: Arc<Router>, group_id: GroupId) -> Self {
        Self { router, group_id }
    }
}

impl SessionDrainCoordinator for GroupSessionGate {
    async fn reject_new_write_sessions(&self) {
        if let Some(state) = self.router.groups.get(&self.group_id) {
            state.reject_new_writes.store(true, Ordering::Release);
        }
    }

    async fn accept_new_write_sessions(&self) {
        if let Some(state) = self.router.groups.get(&self.group_id) {
            state.reject_new_writes.store(false, Ordering::Release);
        }
    }

    async fn drain_write_sessions(&self, deadline: Duration) {
        let Some(state) = self.router.groups.get(&self.group_id) else {
            return;
        };
        let start = tokio::time::Instant::now();
        while state.write_sessions_in_flight.load(Ordering::Acquire) > 0 {
            if start.elapsed() >= deadline {
                tracing::warn!(group_id = %self.group_id, "write sessions still in flight past drain deadline, abandoning");
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Implements the Leader Lease Manager's `DatabaseControl` seam by marking
/// this node's own entry ineligible for selection. Actually issuing a
/// demotion command to the database is out of scope: this crate never
/// decodes or executes the wire protocol it forwards.
pub struct LocalUpstreamControl {
    router: Arc<Router>,
    group_id: GroupId,
    node_id: NodeId,
}

impl LocalUpstreamControl {
    pub fn new(router: Arc<Router>, group_id: GroupId, node_id: NodeId) -> Self {
        Self { router, group_id, node_id }
    }
}

impl DatabaseControl for LocalUpstreamControl {
    async fn demote(&self) -> Result<(), ElectionError> {
        if let Some(entry) = self.router.groups.get(&self.group_id).and_then(|g| g.members.get(&self.node_id)) {
            entry.locally_demoted.store(true, Ordering::Release);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;

    use pgfleet_types::GroupView;

    use super::*;

    fn router_with_snapshot(snapshot: TopologySnapshot) -> (Arc<Router>, watch::Sender<Arc<TopologySnapshot>>) {
        let (tx, rx) = watch::channel(Arc::new(snapshot));
        let mut members = StdHashMap::new();
        members.insert(NodeId::new("a"), "a:5432".to_string());
        members.insert(NodeId::new("b"), "b:5432".to_string());
        let config = RouterConfig {
            groups: vec![RouterGroupConfig {
                group_id: GroupId::new("g1"),
                members,
            }],
            max_per_upstream: 10,
            max_client_connections: 100,
            enqueue_timeout: Duration::from_millis(50),
            wait_for_primary: Duration::from_millis(50),
            read_only_fallback_to_primary: true,
            idle_timeout: Duration::from_secs(600),
        };
        (Arc::new(Router::new(rx, config, Arc::new(Metrics::new()))), tx)
    }

    fn snapshot_with(leader: Option<(&str, u64)>, in_sync: Vec<&str>) -> TopologySnapshot {
        let mut snapshot = TopologySnapshot::empty(0);
        snapshot.version = 1;
        snapshot.groups.insert(
            GroupId::new("g1"),
            GroupView {
                leader: leader.map(|(n, e)| (NodeId::new(n), Epoch::new(e))),
                in_sync: in_sync.into_iter().map(NodeId::new).collect(),
                lagging: vec![],
                dead: vec![],
            },
        );
        snapshot
    }

    #[tokio::test]
    async fn write_intent_routes_to_the_current_leader() {
        let (router, _tx) = router_with_snapshot(snapshot_with(Some(("a", 1)), vec!["b"]));
        let selected = router.route(&GroupId::new("g1"), ClientIntent::ReadWrite).await.unwrap();
        assert_eq!(selected.node_id, NodeId::new("a"));
        assert_eq!(selected.epoch, Some(Epoch::new(1)));
    }

    #[tokio::test]
    async fn write_intent_without_a_leader_times_out_as_no_primary() {
        let (router, _tx) = router_with_snapshot(snapshot_with(None, vec!["b"]));
        let result = router.route(&GroupId::new("g1"), ClientIntent::ReadWrite).await;
        assert!(matches!(result, Err(RouterError::NoPrimary { .. })));
    }

    #[tokio::test]
    async fn read_only_prefers_in_sync_replicas_over_the_leader() {
        let (router, _tx) = router_with_snapshot(snapshot_with(Some(("a", 1)), vec!["b"]));
        let selected = router.route(&GroupId::new("g1"), ClientIntent::ReadOnly).await.unwrap();
        assert_eq!(selected.node_id, NodeId::new("b"));
        assert_eq!(selected.epoch, None);
    }

    #[tokio::test]
    async fn read_only_falls_back_to_leader_when_no_replica_and_fallback_enabled() {
        let (router, _tx) = router_with_snapshot(snapshot_with(Some(("a", 1)), vec![]));
        let selected = router.route(&GroupId::new("g1"), ClientIntent::ReadOnly).await.unwrap();
        assert_eq!(selected.node_id, NodeId::new("a"));
    }

    #[tokio::test]
    async fn fencing_rejects_a_stale_epoch() {
        let (router, _tx) = router_with_snapshot(snapshot_with(Some(("a", 5)), vec!["b"]));
        let result = router.check_fencing(&GroupId::new("g1"), Some(Epoch::new(3)));
        assert!(matches!(result, Err(RouterError::StaleEpoch { .. })));
    }

    #[tokio::test]
    async fn rejecting_new_writes_forces_no_primary_even_with_a_live_leader() {
        let (router, _tx) = router_with_snapshot(snapshot_with(Some(("a", 1)), vec!["b"]));
        let gate = GroupSessionGate::new(router.clone(), GroupId::new("g1"));
        gate.reject_new_write_sessions().await;
        let result = router.route(&GroupId::new("g1"), ClientIntent::ReadWrite).await;
        assert!(matches!(result, Err(RouterError::NoPrimary { .. })));
    }

    #[tokio::test]
    async fn drain_returns_immediately_once_in_flight_count_reaches_zero() {
        let (router, _tx) = router_with_snapshot(snapshot_with(Some(("a", 1)), vec!["b"]));
        let gate = GroupSessionGate::new(router.clone(), GroupId::new("g1"));
        let guard = WriteSessionGuard::new(router.clone(), GroupId::new("g1"));
        drop(guard);
        gate.drain_write_sessions(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn demote_excludes_the_local_node_from_future_selection() {
        let (router, _tx) = router_with_snapshot(snapshot_with(Some(("a", 1)), vec!["b"]));
        let control = LocalUpstreamControl::new(router.clone(), GroupId::new("g1"), NodeId::new("a"));
        control.demote().await.unwrap();
        let result = router.route(&GroupId::new("g1"), ClientIntent::ReadWrite).await;
        assert!(matches!(result, Err(RouterError::NoPrimary { .. })));
    }
}
