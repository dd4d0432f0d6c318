//! Ambient process metrics: a small set of `prometheus`
//! counters and gauges covering pool saturation, circuit-breaker trips, and
//! election activity. Lives below every component crate that needs to
//! increment one of them (the Connection Router/Pool, the Leader Lease
//! Manager, the Health Monitor) so each can hold an `Arc<Metrics>` without
//! depending on `pgfleet-runtime`, which is what actually constructs and
//! registers it once per process.

use prometheus::{IntCounter, IntGauge, Registry};

pub struct Metrics {
    registry: Registry,
    pub pool_enqueue_total: IntCounter,
    pub pool_full_total: IntCounter,
    pub circuit_breaker_trips_total: IntCounter,
    pub elections_total: IntCounter,
    pub health_publish_failures_total: IntCounter,
    pub live_client_connections: IntGauge,
}

impl Metrics {
    /// Registers every metric on a fresh `Registry`. Registration only fails
    /// on a duplicate metric name, which would be a programming error in
    /// this constructor, not a runtime condition callers need to handle.
    #[allow(clippy::missing_panics_doc)]
    pub fn new() -> Self {
        let registry = Registry::new();

        let pool_enqueue_total = IntCounter::new("pgfleet_pool_enqueue_total", "Client sessions that waited for a pool slot").unwrap();
        let pool_full_total = IntCounter::new("pgfleet_pool_full_total", "Sessions rejected after the enqueue timeout elapsed").unwrap();
        let circuit_breaker_trips_total = IntCounter::new("pgfleet_circuit_breaker_trips_total", "Times an upstream circuit breaker opened").unwrap();
        let elections_total = IntCounter::new("pgfleet_elections_total", "Leader elections decided").unwrap();
        let health_publish_failures_total =
            IntCounter::new("pgfleet_health_publish_failures_total", "Health report publish attempts that exhausted their retry budget").unwrap();
        let live_client_connections = IntGauge::new("pgfleet_live_client_connections", "Client connections currently accepted").unwrap();

        registry.register(Box::new(pool_enqueue_total.clone())).unwrap();
        registry.register(Box::new(pool_full_total.clone())).unwrap();
        registry.register(Box::new(circuit_breaker_trips_total.clone())).unwrap();
        registry.register(Box::new(elections_total.clone())).unwrap();
        registry.register(Box::new(health_publish_failures_total.clone())).unwrap();
        registry.register(Box::new(live_client_connections.clone())).unwrap();

        Self {
            registry,
            pool_enqueue_total,
            pool_full_total,
            circuit_breaker_trips_total,
            elections_total,
            health_publish_failures_total,
            live_client_connections,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
