//! In-memory readiness tracker.

use super::{NodeReadiness, ReadyState};

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Current readiness per node.
///
/// Updates are last-write-wins by `observed_at`; when either side has no
/// timestamp, or both are equal, arrival order decides.
#[derive(Debug, Default)]
pub struct ReadinessTracker {
    nodes: HashMap<String, NodeReadiness>,
}

impl ReadinessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a readiness update and return the state it replaced.
    ///
    /// An update older than the stored one is dropped. It reports the incoming
    /// state as the previous one, so classifying the result yields no
    /// transition.
    pub fn apply(
        &mut self,
        node_id: &str,
        state: ReadyState,
        observed_at: Option<DateTime<Utc>>,
    ) -> Option<ReadyState> {
        if let Some(current) = self.nodes.get_mut(node_id) {
            if let (Some(stored), Some(incoming)) = (current.observed_at, observed_at) {
                if incoming < stored {
                    tracing::debug!(
                        node = node_id,
                        stored = %stored,
                        incoming = %incoming,
                        "Ignoring stale readiness update"
                    );
                    return Some(state);
                }
            }

            let previous = current.ready_state;
            current.ready_state = state;
            current.observed_at = observed_at.or(current.observed_at);
            return Some(previous);
        }

        self.nodes.insert(
            node_id.to_string(),
            NodeReadiness {
                node_id: node_id.to_string(),
                ready_state: state,
                observed_at,
            },
        );
        None
    }

    /// Forget a deleted node. Returns its last known state.
    pub fn remove(&mut self, node_id: &str) -> Option<ReadyState> {
        self.nodes.remove(node_id).map(|n| n.ready_state)
    }

    /// Drop every node not present in a full relist. Returns the removed ids.
    pub fn retain_listed(&mut self, listed: &HashSet<String>) -> Vec<String> {
        let mut removed: Vec<String> = self
            .nodes
            .keys()
            .filter(|id| !listed.contains(*id))
            .cloned()
            .collect();
        removed.sort();
        for id in &removed {
            self.nodes.remove(id);
        }
        removed
    }

    /// Point-in-time view ordered by node id.
    pub fn snapshot(&self) -> BTreeMap<String, ReadyState> {
        self.nodes
            .iter()
            .map(|(id, n)| (id.clone(), n.ready_state))
            .collect()
    }

    /// Full per-node records ordered by node id.
    pub fn nodes(&self) -> Vec<NodeReadiness> {
        let mut nodes: Vec<NodeReadiness> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn get(&self, node_id: &str) -> Option<ReadyState> {
        self.nodes.get(node_id).map(|n| n.ready_state)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, secs).unwrap())
    }

    #[test]
    fn test_apply_returns_previous_state() {
        let mut tracker = ReadinessTracker::new();
        assert_eq!(tracker.apply("pi5d01", ReadyState::True, at(0)), None);
        assert_eq!(tracker.apply("pi5d01", ReadyState::False, at(1)), Some(ReadyState::True));
        assert_eq!(tracker.get("pi5d01"), Some(ReadyState::False));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_stale_update_is_ignored() {
        let mut tracker = ReadinessTracker::new();
        tracker.apply("pi5d01", ReadyState::True, at(10));
        assert_eq!(tracker.apply("pi5d01", ReadyState::False, at(5)), Some(ReadyState::False));
        assert_eq!(tracker.get("pi5d01"), Some(ReadyState::True));
    }

    #[test]
    fn test_equal_or_missing_timestamps_use_arrival_order() {
        let mut tracker = ReadinessTracker::new();
        tracker.apply("pi5d01", ReadyState::True, at(10));
        tracker.apply("pi5d01", ReadyState::False, at(10));
        assert_eq!(tracker.get("pi5d01"), Some(ReadyState::False));

        tracker.apply("pi5d01", ReadyState::Unknown, None);
        assert_eq!(tracker.get("pi5d01"), Some(ReadyState::Unknown));
        // Missing timestamp keeps the last known one for later comparisons.
        tracker.apply("pi5d01", ReadyState::True, at(3));
        assert_eq!(tracker.get("pi5d01"), Some(ReadyState::Unknown));
    }

    #[test]
    fn test_remove_and_snapshot_order() {
        let mut tracker = ReadinessTracker::new();
        tracker.apply("pi5d03", ReadyState::True, None);
        tracker.apply("pi5d01", ReadyState::False, None);
        tracker.apply("pi5d02", ReadyState::Unknown, None);

        let ids: Vec<_> = tracker.snapshot().into_keys().collect();
        assert_eq!(ids, vec!["pi5d01", "pi5d02", "pi5d03"]);

        assert_eq!(tracker.remove("pi5d02"), Some(ReadyState::Unknown));
        assert_eq!(tracker.remove("pi5d02"), None);
        assert_eq!(tracker.len(), 2);

        // A node seen again after deletion is a fresh baseline.
        assert_eq!(tracker.apply("pi5d02", ReadyState::False, None), None);
    }

    #[test]
    fn test_retain_listed() {
        let mut tracker = ReadinessTracker::new();
        tracker.apply("a", ReadyState::True, None);
        tracker.apply("b", ReadyState::True, None);
        tracker.apply("c", ReadyState::False, None);

        let listed: HashSet<String> = ["b".to_string()].into_iter().collect();
        assert_eq!(tracker.retain_listed(&listed), vec!["a", "c"]);
        assert_eq!(tracker.nodes().len(), 1);
        assert_eq!(tracker.nodes()[0].node_id, "b");
    }
}
