use serde::{Deserialize, Serialize};

use crate::health::UnixNanos;
use crate::ids::NodeId;

/// Routing intent for a client session, derived from a startup-message hint
/// (or defaulted to `ReadWrite` absent one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientIntent {
    ReadWrite,
    ReadOnly,
    Any,
}

impl ClientIntent {
    /// Parses the configured application-name-like hint. Any value other
    /// than the two explicit intents below falls back to `ReadWrite`, which
    /// is the documented default absent a hint.
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint.map(str::trim) {
            Some("read-only") | Some("readonly") => ClientIntent::ReadOnly,
            Some("any") => ClientIntent::Any,
            _ => ClientIntent::ReadWrite,
        }
    }
}

impl Default for ClientIntent {
    fn default() -> Self {
        ClientIntent::ReadWrite
    }
}

/// A client's session state as tracked by the Connection Router/Pool.
/// Transaction-scoped: `bound_upstream` is cleared between transactions so a
/// client can be re-routed if topology changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    pub client_id: u64,
    pub intent: ClientIntent,
    pub bound_upstream: Option<NodeId>,
    pub started_at: UnixNanos,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl ClientSession {
    pub fn new(client_id: u64, intent: ClientIntent, started_at: UnixNanos) -> Self {
        Self {
            client_id,
            intent,
            bound_upstream: None,
            started_at,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    pub fn bind(&mut self, upstream: NodeId) {
        self.bound_upstream = Some(upstream);
    }

    /// Ends the current transaction, releasing the upstream binding so the
    /// next transaction re-evaluates routing against current topology.
    pub fn unbind(&mut self) {
        self.bound_upstream = None;
    }
}
