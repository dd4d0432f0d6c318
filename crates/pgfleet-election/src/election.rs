//! Two-phase election: candidates publish their WAL position
//! under a short-TTL key, then after `T_elect` every candidate reads all
//! proposals and only the one with the strictly highest WAL position
//! attempts the lease CAS. Ties are broken by lexicographically smallest
//! `NodeId`.

use pgfleet_consensus::keys::{decode_election_value, election_key, election_prefix, encode_election_value};
use pgfleet_consensus::ConsensusStore;
use pgfleet_types::{GroupId, NodeId};

use crate::error::ElectionError;

/// A single candidate's Phase 1 proposal, as read back in Phase 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub node_id: NodeId,
    pub wal_position: u64,
}

/// Publishes this node's WAL position as a Phase 1 proposal. The lease
/// backing the key expires on its own; callers do not need to retract it.
pub async fn propose_wal<C: ConsensusStore>(
    store: &C,
    group_id: &GroupId,
    node_id: &NodeId,
    wal_position: u64,
    proposal_ttl: std::time::Duration,
) -> Result<(), ElectionError> {
    let key = election_key(group_id, node_id);
    let lease = store.grant_lease(proposal_ttl).await?;
    store.put(&key, encode_election_value(wal_position), Some(lease)).await?;
    Ok(())
}

/// Reads every currently-live proposal under the group's election prefix,
/// via `scan_live` rather than a `watch` backlog replay: a proposal's lease
/// expires at the end of its round, and a stale proposal from a departed
/// node or a prior round must not still be eligible to win. Proposals that
/// fail to decode (stale, foreign format) are skipped rather than failing
/// the whole read.
pub async fn read_proposals<C: ConsensusStore>(store: &C, group_id: &GroupId) -> Result<Vec<Proposal>, ElectionError> {
    let prefix = election_prefix(group_id);
    let live = store.scan_live(&prefix).await?;
    let mut by_node = std::collections::BTreeMap::new();
    for (key, versioned) in live {
        if let Some(node_id) = pgfleet_consensus::keys::last_segment(&key) {
            if let Ok(wal_position) = decode_election_value(&versioned.value) {
                by_node.insert(node_id.to_string(), wal_position);
            }
        }
    }
    Ok(by_node
        .into_iter()
        .map(|(node_id, wal_position)| Proposal {
            node_id: NodeId::new(node_id),
            wal_position,
        })
        .collect())
}

/// Decides the winner of a set of proposals: strictly highest WAL position,
/// ties broken by lexicographically smallest `NodeId`. Returns `None` for an
/// empty proposal set.
pub fn decide_winner(proposals: &[Proposal]) -> Option<&NodeId> {
    proposals
        .iter()
        .max_by(|a, b| a.wal_position.cmp(&b.wal_position).then(b.node_id.cmp(&a.node_id)))
        .map(|p| &p.node_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(node: &str, wal: u64) -> Proposal {
        Proposal {
            node_id: NodeId::new(node),
            wal_position: wal,
        }
    }

    #[test]
    fn highest_wal_wins() {
        let proposals = vec![proposal("a", 100), proposal("b", 200), proposal("c", 50)];
        assert_eq!(decide_winner(&proposals), Some(&NodeId::new("b")));
    }

    #[test]
    fn tie_broken_by_lexicographically_smallest_node_id() {
        let proposals = vec![proposal("charlie", 100), proposal("alpha", 100), proposal("bravo", 100)];
        assert_eq!(decide_winner(&proposals), Some(&NodeId::new("alpha")));
    }

    #[test]
    fn empty_proposals_has_no_winner() {
        assert_eq!(decide_winner(&[]), None);
    }

    #[tokio::test]
    async fn propose_then_read_round_trips() {
        let store = pgfleet_consensus::MemoryStore::new();
        let group = GroupId::new("g1");
        propose_wal(&store, &group, &NodeId::new("a"), 100, std::time::Duration::from_secs(1))
            .await
            .unwrap();
        propose_wal(&store, &group, &NodeId::new("b"), 200, std::time::Duration::from_secs(1))
            .await
            .unwrap();

        let proposals = read_proposals(&store, &group).await.unwrap();
        assert_eq!(decide_winner(&proposals), Some(&NodeId::new("b")));
    }

    #[tokio::test]
    async fn a_proposal_whose_lease_expired_is_not_read_back() {
        let store = pgfleet_consensus::MemoryStore::new();
        let group = GroupId::new("g1");
        propose_wal(&store, &group, &NodeId::new("stale"), 999, std::time::Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        propose_wal(&store, &group, &NodeId::new("fresh"), 1, std::time::Duration::from_secs(1))
            .await
            .unwrap();

        let proposals = read_proposals(&store, &group).await.unwrap();
        assert_eq!(decide_winner(&proposals), Some(&NodeId::new("fresh")));
    }
}
