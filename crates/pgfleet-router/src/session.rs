//! Fencing-aware wrapper around `pgfleet_types::ClientSession`: every bind
//! stamps the `(GroupId, Epoch)` the selection was made against, so a
//! forward in flight during a topology change can be rejected rather than
//! silently continuing against a node that is no longer the group's leader
//! (the fencing invariant).

use pgfleet_types::{ClientIntent, ClientSession, Epoch, GroupId, NodeId, UnixNanos};

/// A session bound to a specific upstream for the lifetime of one routing
/// decision. `epoch` is `None` for read intents, which this crate does not
/// fence: a stale-but-in-sync replica read is a staleness concern, not a
/// correctness one.
#[derive(Debug, Clone)]
pub struct RoutedSession {
    pub session: ClientSession,
    pub group_id: GroupId,
    pub node_id: NodeId,
    pub epoch: Option<Epoch>,
}

impl RoutedSession {
    pub fn new(client_id: u64, intent: ClientIntent, started_at: UnixNanos, group_id: GroupId, node_id: NodeId, epoch: Option<Epoch>) -> Self {
        let mut session = ClientSession::new(client_id, intent, started_at);
        session.bind(node_id.clone());
        Self {
            session,
            group_id,
            node_id,
            epoch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_bound_to_its_selected_node() {
        let routed = RoutedSession::new(1, ClientIntent::ReadWrite, 0, GroupId::new("g1"), NodeId::new("a"), Some(Epoch::new(3)));
        assert_eq!(routed.session.bound_upstream, Some(NodeId::new("a")));
        assert_eq!(routed.epoch, Some(Epoch::new(3)));
    }
}
