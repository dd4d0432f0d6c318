//! The Connection Router/Pool: the client-facing TCP
//! listener, bounded per-upstream pooling with a FIFO wait queue, weighted
//! replica selection, per-upstream circuit breaking, and epoch fencing
//! against the Topology Broadcaster's snapshots.

mod buffer;
mod circuit;
mod error;
mod listener;
mod pool;
mod router;
mod selection;
mod session;
mod upstream;

pub use buffer::IoBufferPool;
pub use circuit::CircuitBreaker;
pub use error::RouterError;
pub use listener::ClientListener;
pub use pool::{PoolPermit, UpstreamPool};
pub use router::{GroupSessionGate, LocalUpstreamControl, Router, RouterConfig, RouterGroupConfig, SelectedUpstream, WriteSessionGuard};
pub use selection::WeightedRoundRobin;
pub use session::RoutedSession;
pub use upstream::{forward, TcpUpstream, UpstreamBackend};
