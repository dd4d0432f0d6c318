//! Client-facing TCP accept loop: enforces `max_client_connections`, derives
//! a `ClientIntent` from a connect-time hint, resolves an upstream via
//! `Router`, and forwards bytes until either side closes.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{info, warn};

use pgfleet_metrics::Metrics;
use pgfleet_types::{ClientIntent, GroupId};

use crate::buffer::IoBufferPool;
use crate::error::RouterError;
use crate::router::{Router, WriteSessionGuard};
use crate::upstream::{forward, TcpUpstream, UpstreamBackend};

/// Each forwarded connection borrows two buffers (client-to-upstream and
/// upstream-to-client); this is the default per-buffer capacity.
const FORWARD_BUFFER_CAPACITY: usize = 16 * 1024;

/// Accepts client connections for one group's listening socket, bounded by
/// `max_client_connections` across the whole listener.
pub struct ClientListener<B = TcpUpstream> {
    router: Arc<Router>,
    group_id: GroupId,
    backend: B,
    max_client_connections: usize,
    idle_timeout: std::time::Duration,
    live_clients: Arc<AtomicUsize>,
    next_client_id: AtomicU64,
    buffers: Arc<IoBufferPool>,
    metrics: Arc<Metrics>,
}

impl<B> ClientListener<B>
where
    B: UpstreamBackend + Clone,
{
    pub fn new(
        router: Arc<Router>,
        group_id: GroupId,
        backend: B,
        max_client_connections: usize,
        idle_timeout: std::time::Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            router,
            group_id,
            backend,
            max_client_connections,
            idle_timeout,
            live_clients: Arc::new(AtomicUsize::new(0)),
            next_client_id: AtomicU64::new(1),
            buffers: Arc::new(IoBufferPool::new(max_client_connections.max(1) * 2, FORWARD_BUFFER_CAPACITY)),
            metrics,
        }
    }

    pub fn live_clients(&self) -> usize {
        self.live_clients.load(Ordering::Acquire)
    }

    /// Accepts connections on `listener` until `shutdown` fires. Each
    /// accepted connection is handled on its own spawned task.
    pub async fn serve(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<(), RouterError> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer) = accepted?;
                    if self.live_clients.load(Ordering::Acquire) >= self.max_client_connections {
                        warn!(%peer, "rejecting client, listener at max_client_connections");
                        drop(socket);
                        continue;
                    }
                    self.spawn_client(socket, shutdown.clone());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn spawn_client(&self, socket: TcpStream, shutdown: watch::Receiver<bool>) {
        let client_id = self.next_client_id.fetch_add(1, Ordering::AcqRel);
        let router = self.router.clone();
        let group_id = self.group_id.clone();
        let backend = self.backend.clone();
        let live_clients = self.live_clients.clone();
        let buffers = self.buffers.clone();
        let idle_timeout = self.idle_timeout;
        let metrics = self.metrics.clone();

        live_clients.fetch_add(1, Ordering::AcqRel);
        metrics.live_client_connections.inc();
        tokio::spawn(async move {
            if let Err(err) = handle_client(client_id, socket, router, group_id, backend, buffers, shutdown, idle_timeout).await {
                warn!(client_id, error = %err, "client session ended with an error");
            }
            live_clients.fetch_sub(1, Ordering::AcqRel);
            metrics.live_client_connections.dec();
        });
    }
}

/// Handles one client connection: a single intent is resolved at connect
/// time, since decoding the wire protocol mid-session is out of scope, so a
/// session keeps its bound upstream until it disconnects or is fenced out by
/// a topology change.
async fn handle_client<B: UpstreamBackend>(
    client_id: u64,
    mut socket: TcpStream,
    router: Arc<Router>,
    group_id: GroupId,
    backend: B,
    buffers: Arc<IoBufferPool>,
    shutdown: watch::Receiver<bool>,
    idle_timeout: std::time::Duration,
) -> Result<(), RouterError> {
    // No wire-protocol handshake is parsed; the intent hint is a non-goal
    // the control plane leaves to a future protocol-aware decoder, so every
    // session defaults to read-write until one is wired in.
    let intent = ClientIntent::from_hint(None);

    let selected = router.route(&group_id, intent).await?;
    let permit = router.acquire(&group_id, &selected).await?;
    let _write_guard = matches!(intent, ClientIntent::ReadWrite).then(|| WriteSessionGuard::new(router.clone(), group_id.clone()));

    info!(client_id, node_id = %selected.node_id, group_id = %group_id, "client bound to upstream");

    let mut upstream = match backend.connect(&selected.endpoint).await {
        Ok(stream) => {
            router.record_success(&group_id, &selected.node_id);
            stream
        }
        Err(err) => {
            router.record_failure(&group_id, &selected.node_id);
            return Err(err);
        }
    };

    let result = forward(&mut socket, &mut upstream, &buffers, shutdown, idle_timeout).await;
    drop(permit);
    if result.is_ok() {
        router.record_success(&group_id, &selected.node_id);
    }
    result
}
