//! Wires every control-plane component into one supervised process:
//! one Health Monitor and one Leader Lease Manager per group this node is a
//! member of, one Topology Broadcaster, and the Connection Router/Pool's
//! listener(s), all sharing a single `ConsensusStore` handle and shutting
//! down together on a broadcast `watch` signal (grounded on this codebase's
//! cluster-supervisor pattern of one `tokio::select!` loop driving many
//! owned components).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use pgfleet_config::PgfleetConfig;
use pgfleet_consensus::keys::cluster_id_key;
use pgfleet_consensus::{ConsensusStore, Precondition};
use pgfleet_election::{LeaderLeaseConfig, LeaderLeaseManager};
use pgfleet_health::{DatabaseProbe, HealthMonitor, HealthMonitorConfig, LagThresholds};
use pgfleet_router::{ClientListener, GroupSessionGate, LocalUpstreamControl, Router, RouterConfig, RouterGroupConfig, UpstreamBackend};
use pgfleet_topology::{GroupMembership, TopologyBroadcaster, TopologyBroadcasterConfig};
use pgfleet_types::{GroupId, NodeId};

use pgfleet_metrics::Metrics;

use crate::error::RuntimeError;

/// How long startup waits for the consensus store to answer the cluster-id
/// handshake before giving up.
const STARTUP_GRACE: Duration = Duration::from_secs(10);

type LocalLeaderLeaseManager<C> = LeaderLeaseManager<C, LocalUpstreamControl, GroupSessionGate>;

/// One running pgfleet process: every group this node serves, bound
/// together by a shared consensus store handle and one shutdown signal.
pub struct Runtime<C, P, B> {
    config: PgfleetConfig,
    metrics: Arc<Metrics>,
    topology: Arc<TopologyBroadcaster<C>>,
    router: Arc<Router>,
    health_monitors: Vec<Arc<HealthMonitor<C, P>>>,
    lease_managers: Vec<Arc<LocalLeaderLeaseManager<C>>>,
    backend: B,
    listen_addrs: Vec<(GroupId, SocketAddr)>,
    shutdown_tx: watch::Sender<bool>,
}

impl<C, P, B> Runtime<C, P, B>
where
    C: ConsensusStore + Clone,
    P: DatabaseProbe + Clone,
    B: UpstreamBackend + Clone,
{
    /// Validates configuration, confirms (or establishes) this cluster's
    /// identity in the consensus store, and builds every component without
    /// starting any of them.
    pub async fn new(store: C, probe: P, backend: B, config: PgfleetConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        verify_cluster_id(&store, &config.cluster_id).await?;

        let metrics = Arc::new(Metrics::new());
        let node_id = NodeId::new(config.node_id.clone());

        let memberships: Vec<GroupMembership> = config
            .groups
            .iter()
            .map(|g| GroupMembership {
                group_id: GroupId::new(g.id.clone()),
                members: g.members.keys().map(|n| NodeId::new(n.clone())).collect(),
            })
            .collect();

        let topology = Arc::new(TopologyBroadcaster::new(
            store.clone(),
            TopologyBroadcasterConfig {
                groups: memberships,
                poll_interval: config.probe.interval() * 2,
            },
        ));

        let router_groups: Vec<RouterGroupConfig> = config
            .groups
            .iter()
            .map(|g| RouterGroupConfig {
                group_id: GroupId::new(g.id.clone()),
                members: g.members.iter().map(|(n, endpoint)| (NodeId::new(n.clone()), endpoint.clone())).collect(),
            })
            .collect();

        let router = Arc::new(Router::new(
            topology.subscribe(),
            RouterConfig {
                groups: router_groups,
                max_per_upstream: config.pool.max_per_upstream,
                max_client_connections: config.pool.max_client_connections,
                enqueue_timeout: config.pool.enqueue_timeout(),
                wait_for_primary: config.routing.wait_for_primary(),
                read_only_fallback_to_primary: config.routing.read_only_fallback_to_primary,
                idle_timeout: config.pool.idle_timeout(),
            },
            metrics.clone(),
        ));

        let mut health_monitors = Vec::new();
        let mut lease_managers = Vec::new();
        let mut listen_addrs = Vec::new();

        let base_addr: SocketAddr = config
            .listen_address
            .parse()
            .map_err(|_| RuntimeError::Invariant(format!("invalid listen_address {}", config.listen_address)))?;

        for (index, group) in config.groups.iter().enumerate() {
            let group_id = GroupId::new(group.id.clone());
            if !group.members.contains_key(&config.node_id) {
                continue;
            }

            let health_config = HealthMonitorConfig {
                probe_interval: config.probe.interval(),
                probe_timeout: config.probe.timeout(),
                lag_thresholds: LagThresholds {
                    bytes: group.lag_threshold_bytes,
                    seconds: group.lag_threshold_seconds,
                },
            };
            let monitor = Arc::new(HealthMonitor::new(
                store.clone(),
                probe.clone(),
                group_id.clone(),
                node_id.clone(),
                health_config,
                metrics.clone(),
            ));

            let lease_config = LeaderLeaseConfig {
                lease_ttl: group.lease_ttl(),
                t_elect: config.probe.interval(),
                t_dead: health_config.report_ttl(),
                drain_timeout: config.pool.drain_timeout(),
            };
            let database = LocalUpstreamControl::new(router.clone(), group_id.clone(), node_id.clone());
            let sessions = GroupSessionGate::new(router.clone(), group_id.clone());
            let llm = Arc::new(LeaderLeaseManager::new(
                store.clone(),
                database,
                sessions,
                group_id.clone(),
                node_id.clone(),
                lease_config,
                monitor.local_observation(),
                metrics.clone(),
            ));

            health_monitors.push(monitor);
            lease_managers.push(llm);

            let mut addr = base_addr;
            addr.set_port(base_addr.port() + index as u16);
            listen_addrs.push((group_id, addr));
        }

        let (shutdown_tx, _rx) = watch::channel(false);

        Ok(Self {
            config,
            metrics,
            topology,
            router,
            health_monitors,
            lease_managers,
            backend,
            listen_addrs,
            shutdown_tx,
        })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    /// Binds every configured listener and spawns every component's run
    /// loop, then returns their join handles. Does not block; call
    /// `shutdown` and await the returned handles to stop cleanly.
    pub async fn start(&self) -> Result<Vec<JoinHandle<()>>, RuntimeError> {
        let mut handles = Vec::new();

        let topology = self.topology.clone();
        let shutdown = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move { topology.run(shutdown).await }));

        for monitor in &self.health_monitors {
            let monitor = monitor.clone();
            let shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move { monitor.run(shutdown).await }));
        }

        for llm in &self.lease_managers {
            let llm = llm.clone();
            let shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move { llm.run(shutdown).await }));
        }

        for (group_id, addr) in &self.listen_addrs {
            let tcp_listener = TcpListener::bind(addr).await?;
            info!(group_id = %group_id, %addr, "listening for client connections");
            let listener = Arc::new(ClientListener::new(
                self.router.clone(),
                group_id.clone(),
                self.backend.clone(),
                self.config.pool.max_client_connections,
                self.config.pool.idle_timeout(),
                self.metrics.clone(),
            ));
            let shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                if let Err(err) = listener.serve(tcp_listener, shutdown).await {
                    warn!(error = %err, "client listener exited with an error");
                }
            }));
        }

        Ok(handles)
    }

    /// Signals every component to stop and awaits their join handles.
    pub async fn shutdown(&self, handles: Vec<JoinHandle<()>>) {
        let _ = self.shutdown_tx.send(true);
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Confirms this node's `cluster_id` against the one recorded in the
/// consensus store, establishing it via CAS if none exists yet. Retries
/// `Unavailable` errors with a short fixed backoff until `STARTUP_GRACE`
/// elapses.
async fn verify_cluster_id<C: ConsensusStore>(store: &C, configured: &str) -> Result<(), RuntimeError> {
    let deadline = tokio::time::Instant::now() + STARTUP_GRACE;
    loop {
        match store.get(&cluster_id_key()).await {
            Ok(Some(versioned)) => {
                let recorded = String::from_utf8_lossy(&versioned.value).into_owned();
                return if recorded == configured {
                    Ok(())
                } else {
                    Err(RuntimeError::ClusterIdMismatch {
                        configured: configured.to_string(),
                        recorded,
                    })
                };
            }
            Ok(None) => {
                match store
                    .compare_and_swap(&cluster_id_key(), Precondition::Absent, configured.as_bytes().to_vec().into(), None)
                    .await
                {
                    Ok(_) => return Ok(()),
                    Err(_conflict) => continue,
                }
            }
            Err(err) if err.is_retryable() && tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Err(err) => return Err(RuntimeError::ConsensusUnavailable(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pgfleet_config::GroupConfig;
    use pgfleet_consensus::MemoryStore;
    use pgfleet_health::StaticProbe;
    use pgfleet_router::TcpUpstream;

    use super::*;

    fn config() -> PgfleetConfig {
        let mut members = BTreeMap::new();
        members.insert("a".to_string(), "127.0.0.1:15432".to_string());
        PgfleetConfig {
            listen_address: "127.0.0.1:0".to_string(),
            cluster_id: "2f3f5e0a-7b1a-4e3a-9b8b-3a2e9f5b6c7d".to_string(),
            node_id: "a".to_string(),
            consensus_endpoints: vec!["memory://local".to_string()],
            groups: vec![GroupConfig {
                id: "g1".to_string(),
                members,
                lease_ttl_seconds: 10,
                lag_threshold_bytes: 16 * 1024 * 1024,
                lag_threshold_seconds: 5,
            }],
            ..PgfleetConfig::default()
        }
    }

    #[tokio::test]
    async fn builds_one_health_monitor_and_lease_manager_per_local_group() {
        let store = MemoryStore::new();
        let runtime = Runtime::new(store, StaticProbe::always_primary(), TcpUpstream, config()).await.unwrap();
        assert_eq!(runtime.health_monitors.len(), 1);
        assert_eq!(runtime.lease_managers.len(), 1);
        assert_eq!(runtime.listen_addrs.len(), 1);
    }

    #[tokio::test]
    async fn second_construction_with_a_different_cluster_id_is_rejected() {
        let store = MemoryStore::new();
        Runtime::new(store.clone(), StaticProbe::always_primary(), TcpUpstream, config()).await.unwrap();

        let mut mismatched = config();
        mismatched.cluster_id = "5a6b7c8d-9e0f-4a1b-8c2d-3e4f5a6b7c8d".to_string();
        let result = Runtime::new(store, StaticProbe::always_primary(), TcpUpstream, mismatched).await;
        assert!(matches!(result, Err(RuntimeError::ClusterIdMismatch { .. })));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_touching_the_store() {
        let store = MemoryStore::new();
        let mut bad = config();
        bad.groups.clear();
        let result = Runtime::new(store, StaticProbe::always_primary(), TcpUpstream, bad).await;
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }
}
