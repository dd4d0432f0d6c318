//! The Leader Lease Manager: a per-group, per-node state
//! machine that competes for and renews the group's leader lease, and
//! demotes gracefully when it is lost.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use pgfleet_consensus::keys::{health_key, lease_key, LeaseValue};
use pgfleet_consensus::{ConsensusStore, Precondition};
use pgfleet_health::LocalObservation;
use pgfleet_metrics::Metrics;
use pgfleet_types::{Epoch, GroupId, NodeId, Role, UnixNanos};

use crate::election::{decide_winner, propose_wal, read_proposals};
use crate::error::ElectionError;
use crate::state::LeaseState;

/// Demotes the local database, rendering it non-writable. Implemented by the
/// Connection Router/Pool against its upstream connection.
pub trait DatabaseControl: Send + Sync + 'static {
    fn demote(&self) -> impl Future<Output = Result<(), ElectionError>> + Send;
}

/// Coordinates write-session admission and draining around a demotion.
/// Implemented by the Connection Router/Pool's session listener.
pub trait SessionDrainCoordinator: Send + Sync + 'static {
    /// Immediately rejects newly arriving write-intent sessions for this
    /// group. Sessions already bound are unaffected.
    fn reject_new_write_sessions(&self) -> impl Future<Output = ()> + Send;

    /// Reverses `reject_new_write_sessions`, used when a candidacy is
    /// abandoned before the lease is ever held.
    fn accept_new_write_sessions(&self) -> impl Future<Output = ()> + Send;

    /// Waits for in-flight write sessions to finish, up to `deadline`, then
    /// forcibly closes any survivors. Never fails: closing is best-effort.
    fn drain_write_sessions(&self, deadline: Duration) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy)]
pub struct LeaderLeaseConfig {
    pub lease_ttl: Duration,
    pub t_elect: Duration,
    pub t_dead: Duration,
    pub drain_timeout: Duration,
}

impl LeaderLeaseConfig {
    /// Renewal fires this long before `ExpiresAt` (1/3 of the lease TTL).
    pub fn safety_margin(&self) -> Duration {
        self.lease_ttl / 3
    }
}

pub struct LeaderLeaseManager<C, D, S> {
    store: C,
    database: D,
    sessions: S,
    group_id: GroupId,
    node_id: NodeId,
    config: LeaderLeaseConfig,
    local_observation: watch::Receiver<LocalObservation>,
    state_tx: watch::Sender<LeaseState>,
    metrics: Arc<Metrics>,
}

impl<C, D, S> LeaderLeaseManager<C, D, S>
where
    C: ConsensusStore + Clone,
    D: DatabaseControl,
    S: SessionDrainCoordinator,
{
    pub fn new(
        store: C,
        database: D,
        sessions: S,
        group_id: GroupId,
        node_id: NodeId,
        config: LeaderLeaseConfig,
        local_observation: watch::Receiver<LocalObservation>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (state_tx, _rx) = watch::channel(LeaseState::Follower);
        Self {
            store,
            database,
            sessions,
            group_id,
            node_id,
            config,
            local_observation,
            state_tx,
            metrics,
        }
    }

    pub fn state(&self) -> watch::Receiver<LeaseState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: LeaseState) {
        debug!(group_id = %self.group_id, node_id = %self.node_id, ?state, "lease manager state transition");
        let _ = self.state_tx.send(state);
    }

    /// Runs the state machine until `shutdown` fires. On shutdown, releases
    /// the lease if held (best-effort: failure to release is not fatal,
    /// since the lease will simply expire).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let current = *self.state_tx.borrow();
            let next = tokio::select! {
                next = self.step(current) => next,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.release_best_effort(current).await;
                        self.set_state(LeaseState::Stopped);
                        return;
                    }
                    current
                }
            };
            self.set_state(next);
        }
    }

    async fn step(&self, current: LeaseState) -> LeaseState {
        match current {
            LeaseState::Follower => self.follower_step().await,
            LeaseState::Candidate => self.candidate_step().await,
            LeaseState::Leader(revision) => self.leader_step(revision).await,
            LeaseState::Demoting => self.demoting_step().await,
            LeaseState::Stopped => LeaseState::Stopped,
        }
    }

    async fn follower_step(&self) -> LeaseState {
        let lease = match self.store.get(&lease_key(&self.group_id)).await {
            Ok(lease) => lease,
            Err(err) => {
                warn!(error = %err, "follower could not read lease key, retrying");
                tokio::time::sleep(Duration::from_millis(500)).await;
                return LeaseState::Follower;
            }
        };

        let vacant = match &lease {
            None => true,
            Some(versioned) => {
                let Ok(decoded) = LeaseValue::decode(&versioned.value) else {
                    return LeaseState::Follower;
                };
                !decoded.is_live(self.now_nanos()) || self.leader_is_dead(&decoded.node_id).await
            }
        };

        if !vacant {
            tokio::time::sleep(Duration::from_millis(200)).await;
            return LeaseState::Follower;
        }

        if self.is_candidacy_eligible() {
            LeaseState::Candidate
        } else {
            tokio::time::sleep(Duration::from_millis(200)).await;
            LeaseState::Follower
        }
    }

    fn is_candidacy_eligible(&self) -> bool {
        matches!(
            self.local_observation.borrow().role,
            Role::Primary | Role::StandbyInSync
        )
    }

    async fn leader_is_dead(&self, leader: &NodeId) -> bool {
        if *leader == self.node_id {
            return false;
        }
        match self.store.get(&health_key(&self.group_id, leader)).await {
            Ok(Some(versioned)) => {
                let Ok(report) = pgfleet_consensus::keys::HealthValue::decode(&versioned.value) else {
                    return true;
                };
                if report.role != Role::Unreachable {
                    return false;
                }
                let elapsed_nanos = self.now_nanos().saturating_sub(report.observed_at);
                elapsed_nanos >= self.config.t_dead.as_nanos() as i64
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    async fn candidate_step(&self) -> LeaseState {
        let wal_position = self.local_observation.borrow().wal_position;
        if let Err(err) = propose_wal(&self.store, &self.group_id, &self.node_id, wal_position, self.config.t_elect).await {
            warn!(error = %err, "failed to publish election proposal");
            return LeaseState::Follower;
        }

        tokio::time::sleep(self.config.t_elect).await;

        let proposals = match read_proposals(&self.store, &self.group_id).await {
            Ok(proposals) => proposals,
            Err(err) => {
                warn!(error = %err, "failed to read election proposals");
                return LeaseState::Follower;
            }
        };

        if decide_winner(&proposals) != Some(&self.node_id) {
            tokio::time::sleep(self.config.lease_ttl).await;
            return LeaseState::Follower;
        }

        self.metrics.elections_total.inc();
        self.attempt_promotion().await
    }

    async fn attempt_promotion(&self) -> LeaseState {
        let key = lease_key(&self.group_id);
        let current = match self.store.get(&key).await {
            Ok(current) => current,
            Err(err) => {
                warn!(error = %err, "failed to re-read lease before promotion attempt");
                return LeaseState::Follower;
            }
        };
        let (precondition, next_epoch) = match &current {
            None => (Precondition::Absent, Epoch::ZERO.next()),
            Some(versioned) => {
                let epoch = LeaseValue::decode(&versioned.value)
                    .map(|decoded| decoded.epoch.next())
                    .unwrap_or_else(|_| Epoch::ZERO.next());
                (Precondition::Revision(versioned.revision), epoch)
            }
        };

        let value = LeaseValue {
            node_id: self.node_id.clone(),
            epoch: next_epoch,
            expires_at: self.now_nanos() + self.config.lease_ttl.as_nanos() as i64,
        };

        match self.store.compare_and_swap(&key, precondition, value.encode(), None).await {
            Ok(revision) => {
                info!(group_id = %self.group_id, node_id = %self.node_id, epoch = %next_epoch, "promoted to leader");
                self.sessions.accept_new_write_sessions().await;
                LeaseState::Leader(revision)
            }
            Err(err) => {
                debug!(error = %err, "lease promotion lost race, reverting to follower");
                LeaseState::Follower
            }
        }
    }

    async fn leader_step(&self, revision: u64) -> LeaseState {
        let renew_at = self.config.lease_ttl.saturating_sub(self.config.safety_margin());
        tokio::time::sleep(renew_at).await;

        let key = lease_key(&self.group_id);
        let value = match self.store.get(&key).await {
            Ok(Some(versioned)) => LeaseValue::decode(&versioned.value).ok().map(|decoded| (decoded, versioned.revision)),
            _ => None,
        };
        let Some((decoded, current_revision)) = value else {
            warn!(group_id = %self.group_id, "lease vanished while leading, demoting");
            return LeaseState::Demoting;
        };
        if decoded.node_id != self.node_id || current_revision != revision {
            warn!(group_id = %self.group_id, "lease holder changed underneath us, demoting");
            return LeaseState::Demoting;
        }

        let renewed = LeaseValue {
            node_id: self.node_id.clone(),
            epoch: decoded.epoch,
            expires_at: self.now_nanos() + self.config.lease_ttl.as_nanos() as i64,
        };
        match self
            .store
            .compare_and_swap(&key, Precondition::Revision(current_revision), renewed.encode(), None)
            .await
        {
            Ok(new_revision) => LeaseState::Leader(new_revision),
            Err(err) => {
                warn!(error = %err, "lease renewal failed, demoting");
                LeaseState::Demoting
            }
        }
    }

    /// The four-step demotion sequence.
    async fn demoting_step(&self) -> LeaseState {
        self.sessions.reject_new_write_sessions().await;
        if let Err(err) = self.database.demote().await {
            warn!(error = %err, "local database refused demotion command");
        }
        self.sessions.drain_write_sessions(self.config.drain_timeout).await;
        LeaseState::Follower
    }

    async fn release_best_effort(&self, current: LeaseState) {
        if let LeaseState::Leader(revision) = current {
            let key = lease_key(&self.group_id);
            if let Err(err) = self.store.delete(&key, Some(revision)).await {
                debug!(error = %err, "best-effort lease release failed, will expire on its own");
            }
        }
    }

    fn now_nanos(&self) -> UnixNanos {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    use pgfleet_consensus::MemoryStore;

    use super::*;

    #[derive(Clone, Default)]
    struct FakeDatabase {
        demotions: Arc<AtomicU32>,
    }

    impl DatabaseControl for FakeDatabase {
        async fn demote(&self) -> Result<(), ElectionError> {
            self.demotions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeSessions {
        rejecting: Arc<AtomicBool>,
    }

    impl SessionDrainCoordinator for FakeSessions {
        async fn reject_new_write_sessions(&self) {
            self.rejecting.store(true, Ordering::SeqCst);
        }
        async fn accept_new_write_sessions(&self) {
            self.rejecting.store(false, Ordering::SeqCst);
        }
        async fn drain_write_sessions(&self, _deadline: Duration) {}
    }

    fn config() -> LeaderLeaseConfig {
        LeaderLeaseConfig {
            lease_ttl: Duration::from_millis(300),
            t_elect: Duration::from_millis(20),
            t_dead: Duration::from_secs(3),
            drain_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn uncontested_candidate_wins_promotion() {
        let store = MemoryStore::new();
        let (_tx, rx) = watch::channel(LocalObservation {
            role: Role::Primary,
            wal_position: 100,
        });
        let llm = LeaderLeaseManager::new(
            store.clone(),
            FakeDatabase::default(),
            FakeSessions::default(),
            GroupId::new("g1"),
            NodeId::new("solo"),
            config(),
            rx,
            Arc::new(Metrics::new()),
        );

        let next = llm.candidate_step().await;
        assert!(matches!(next, LeaseState::Leader(_)));

        let stored = store.get(&lease_key(&GroupId::new("g1"))).await.unwrap().unwrap();
        let decoded = LeaseValue::decode(&stored.value).unwrap();
        assert_eq!(decoded.node_id, NodeId::new("solo"));
        assert_eq!(decoded.epoch, Epoch::ZERO.next());
    }

    #[tokio::test]
    async fn demotion_rejects_sessions_and_calls_database_control() {
        let store = MemoryStore::new();
        let (_tx, rx) = watch::channel(LocalObservation {
            role: Role::Primary,
            wal_position: 0,
        });
        let database = FakeDatabase::default();
        let sessions = FakeSessions::default();
        let llm = LeaderLeaseManager::new(
            store,
            database.clone(),
            sessions.clone(),
            GroupId::new("g1"),
            NodeId::new("n1"),
            config(),
            rx,
            Arc::new(Metrics::new()),
        );

        let next = llm.demoting_step().await;
        assert_eq!(next, LeaseState::Follower);
        assert_eq!(database.demotions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn follower_ignores_vacant_lease_without_eligible_local_role() {
        let store = MemoryStore::new();
        let (_tx, rx) = watch::channel(LocalObservation {
            role: Role::StandbyLagging,
            wal_position: 10,
        });
        let llm = LeaderLeaseManager::new(
            store,
            FakeDatabase::default(),
            FakeSessions::default(),
            GroupId::new("g1"),
            NodeId::new("n1"),
            config(),
            rx,
            Arc::new(Metrics::new()),
        );

        assert!(!llm.is_candidacy_eligible());
    }
}
