//! Upstream selection: the leader for write intent; smooth
//! weighted round robin over in-sync replicas (weight `1 / (1 +
//! live_connections)`) for read intent, with counter state carried across
//! calls so repeated routing of an unchanged topology is idempotent up to
//! that counter, so repeated calls converge rather than drift.

use std::collections::HashMap;
use std::sync::Mutex;

use pgfleet_types::NodeId;

/// Smooth weighted round robin: each call adds every candidate's weight to
/// its running total, returns the candidate with the highest total, then
/// subtracts the sum of all weights from the winner. This converges to
/// picking each candidate proportionally to its weight without ever
/// starving a low-weight candidate, unlike plain weighted-random choice.
#[derive(Default)]
pub struct WeightedRoundRobin {
    current: Mutex<HashMap<NodeId, f64>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&self, candidates: &[(NodeId, f64)]) -> Option<NodeId> {
        if candidates.is_empty() {
            return None;
        }
        let mut current = self.current.lock().expect("weighted round robin mutex poisoned");
        let total_weight: f64 = candidates.iter().map(|(_, w)| w).sum();

        for (node, weight) in candidates {
            *current.entry(node.clone()).or_insert(0.0) += weight;
        }

        let winner = candidates
            .iter()
            .max_by(|a, b| {
                let a_score = current.get(&a.0).copied().unwrap_or(0.0);
                let b_score = current.get(&b.0).copied().unwrap_or(0.0);
                a_score.partial_cmp(&b_score).unwrap_or(std::cmp::Ordering::Equal)
            })?
            .0
            .clone();

        if let Some(score) = current.get_mut(&winner) {
            *score -= total_weight;
        }
        Some(winner)
    }
}
