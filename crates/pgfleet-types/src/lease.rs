use serde::{Deserialize, Serialize};

use crate::health::UnixNanos;
use crate::ids::{Epoch, NodeId};

/// A time-bounded leadership claim stored at `/group/<G>/lease`. Holds iff
/// `now < expires_at` and the key's consensus-store revision equals the
/// revision recorded when this value was written (the `revision` field,
/// populated by the consensus client on read or successful CAS).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub node_id: NodeId,
    pub epoch: Epoch,
    pub expires_at: UnixNanos,
    /// The consensus-store revision this lease was written at. Absent for a
    /// lease value constructed before it has been persisted.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub revision: Option<u64>,
}

impl Lease {
    pub fn new(node_id: NodeId, epoch: Epoch, expires_at: UnixNanos) -> Self {
        Self {
            node_id,
            epoch,
            expires_at,
            revision: None,
        }
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn is_live(&self, now: UnixNanos) -> bool {
        now < self.expires_at
    }
}
