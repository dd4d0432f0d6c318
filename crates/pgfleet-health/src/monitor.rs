//! The Health Monitor: probes the local database on an
//! interval, classifies it, and publishes a `HealthReport` to the consensus
//! store under a short-TTL key.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use pgfleet_consensus::keys::{health_key, HealthValue};
use pgfleet_consensus::ConsensusStore;
use pgfleet_metrics::Metrics;
use pgfleet_types::{GroupId, NodeId, Role};

use crate::classify::{classify, LagThresholds};
use crate::probe::DatabaseProbe;

/// The locally observed role and WAL position, updated every probe
/// regardless of whether publication to the consensus store succeeds.
/// Cheap for in-process subscribers (the Leader Lease Manager deciding
/// candidacy and proposal WAL for its own node) to read without a round
/// trip through the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalObservation {
    pub role: Role,
    pub wal_position: u64,
}

impl LocalObservation {
    const fn unknown() -> Self {
        Self {
            role: Role::Unknown,
            wal_position: 0,
        }
    }
}

/// A single publish attempt is retried with this backoff sequence before
/// the interval is counted as failed.
const PUBLISH_BACKOFF: [Duration; 3] = [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];
const PUBLISH_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// After this many consecutive failed intervals, the monitor considers its
/// reports demoted to local-only: other components reading the consensus
/// store see a missing key and treat the node as `Unknown`.
const LOCAL_ONLY_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct HealthMonitorConfig {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub lag_thresholds: LagThresholds,
}

impl HealthMonitorConfig {
    /// TTL for the published `HealthReport`: `3 * T_probe`.
    pub fn report_ttl(&self) -> Duration {
        self.probe_interval * 3
    }
}

pub struct HealthMonitor<C, P> {
    store: C,
    probe: P,
    group_id: GroupId,
    node_id: NodeId,
    config: HealthMonitorConfig,
    consecutive_publish_failures: AtomicU32,
    local_observation_tx: watch::Sender<LocalObservation>,
    metrics: Arc<Metrics>,
}

impl<C, P> HealthMonitor<C, P>
where
    C: ConsensusStore + Clone,
    P: DatabaseProbe,
{
    pub fn new(store: C, probe: P, group_id: GroupId, node_id: NodeId, config: HealthMonitorConfig, metrics: Arc<Metrics>) -> Self {
        let (local_observation_tx, _rx) = watch::channel(LocalObservation::unknown());
        Self {
            store,
            probe,
            group_id,
            node_id,
            config,
            consecutive_publish_failures: AtomicU32::new(0),
            local_observation_tx,
            metrics,
        }
    }

    /// Subscribes to this node's locally observed role and WAL position.
    pub fn local_observation(&self) -> watch::Receiver<LocalObservation> {
        self.local_observation_tx.subscribe()
    }

    /// Whether this monitor's reports have been demoted to local-only after
    /// repeated publish failure.
    pub fn is_local_only(&self) -> bool {
        self.consecutive_publish_failures.load(Ordering::Acquire) > LOCAL_ONLY_THRESHOLD
    }

    /// Runs the probe loop until `shutdown` is signalled. Ticks use
    /// `MissedTickBehavior::Delay` so a probe still in flight when the next
    /// tick would fire simply cancels that slot rather than stacking
    /// concurrent probes: probes are single-flight per node.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_and_publish_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!(group_id = %self.group_id, node_id = %self.node_id, "health monitor shutting down");
                        return;
                    }
                }
            }
        }
    }

    async fn probe_and_publish_once(&self) {
        let observation = match tokio::time::timeout(self.config.probe_timeout, self.probe.probe()).await {
            Ok(Ok(observation)) => Some(observation),
            Ok(Err(err)) => {
                debug!(group_id = %self.group_id, node_id = %self.node_id, error = %err, "probe failed");
                None
            }
            Err(_elapsed) => {
                debug!(group_id = %self.group_id, node_id = %self.node_id, "probe timed out");
                None
            }
        };
        let role = classify(observation, self.config.lag_thresholds);
        let wal_position = observation.map_or(0, |o| o.wal_position);
        let _ = self.local_observation_tx.send(LocalObservation { role, wal_position });

        let value = HealthValue {
            role,
            lag_bytes: observation.map_or(0, |o| o.lag_bytes),
            wal_position,
            observed_at: now_nanos(),
        };

        if self.publish_with_retry(value).await {
            self.consecutive_publish_failures.store(0, Ordering::Release);
        } else {
            self.metrics.health_publish_failures_total.inc();
            let failures = self.consecutive_publish_failures.fetch_add(1, Ordering::AcqRel) + 1;
            if failures == LOCAL_ONLY_THRESHOLD + 1 {
                warn!(
                    group_id = %self.group_id, node_id = %self.node_id,
                    "repeated publish failure, demoting health reports to local-only"
                );
            }
        }
    }

    async fn publish_with_retry(&self, value: HealthValue) -> bool {
        let key = health_key(&self.group_id, &self.node_id);
        for backoff in std::iter::once(Duration::ZERO).chain(PUBLISH_BACKOFF) {
            if backoff > Duration::ZERO {
                let jitter = rand::thread_rng().gen_range(0..100);
                tokio::time::sleep((backoff + Duration::from_millis(jitter)).min(PUBLISH_BACKOFF_CAP)).await;
            }
            let lease = match self.store.grant_lease(self.config.report_ttl()).await {
                Ok(lease) => lease,
                Err(err) => {
                    debug!(error = %err, "failed to grant health-report lease");
                    continue;
                }
            };
            match self.store.put(&key, value.encode(), Some(lease)).await {
                Ok(_) => return true,
                Err(err) => debug!(error = %err, "failed to publish health report"),
            }
        }
        false
    }
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
    use crate::probe::ProbeObservation;
    use pgfleet_consensus::MemoryStore;
    use pgfleet_types::{GroupId, NodeId};

    fn config() -> HealthMonitorConfig {
        HealthMonitorConfig {
            probe_interval: Duration::from_millis(20),
            probe_timeout: Duration::from_millis(10),
            lag_thresholds: LagThresholds {
                bytes: 16 * 1024 * 1024,
                seconds: 5,
            },
        }
    }

    #[tokio::test]
    async fn successful_probe_publishes_role_and_resets_local_only() {
        let store = MemoryStore::new();
        let probe = crate::probe::ScriptedProbe::new(vec![Ok(ProbeObservation {
            writable: true,
            in_recovery: false,
            lag_bytes: 0,
            lag_seconds: 0,
            wal_position: 42,
        })]);
        let monitor = HealthMonitor::new(store.clone(), probe, GroupId::new("g1"), NodeId::new("n1"), config(), Arc::new(Metrics::new()));

        monitor.probe_and_publish_once().await;

        assert!(!monitor.is_local_only());
        assert_eq!(monitor.local_observation().borrow().role, Role::Primary);

        let key = health_key(&GroupId::new("g1"), &NodeId::new("n1"));
        let stored = store.get(&key).await.unwrap().unwrap();
        let decoded = HealthValue::decode(&stored.value).unwrap();
        assert_eq!(decoded.role, Role::Primary);
        assert_eq!(decoded.wal_position, 42);
    }

    #[tokio::test]
    async fn connection_failure_classifies_unreachable_without_publish_error() {
        let store = MemoryStore::new();
        let probe = crate::probe::ScriptedProbe::new(vec![Err(HealthError::ConnectFailed("refused".into()))]);
        let monitor = HealthMonitor::new(store, probe, GroupId::new("g1"), NodeId::new("n1"), config(), Arc::new(Metrics::new()));

        monitor.probe_and_publish_once().await;

        assert_eq!(monitor.local_observation().borrow().role, Role::Unreachable);
    }
}
