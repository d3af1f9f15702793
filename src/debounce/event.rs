//! Outgoing event composed when a debounce window closes.

use super::DebounceWindow;
use crate::readiness::ReadyState;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Kind of a fired event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Incident,
    Recovery,
    Mixed,
}

impl EventKind {
    /// Short status label carried in the payload.
    pub fn status(self) -> &'static str {
        match self {
            EventKind::Incident => "node-down",
            EventKind::Recovery => "node-recovered",
            EventKind::Mixed => "node-change",
        }
    }

    /// Name used by older consumers of the payload.
    pub fn legacy_name(self) -> &'static str {
        match self {
            EventKind::Incident => "incident",
            EventKind::Recovery => "resolved",
            EventKind::Mixed => "mixed",
        }
    }

    pub fn error_type(self) -> &'static str {
        match self {
            EventKind::Incident => "node_not_ready",
            EventKind::Recovery => "node_recovered",
            EventKind::Mixed => "node_state_change",
        }
    }

    pub fn error_code(self) -> &'static str {
        match self {
            EventKind::Incident => "NODE_NOT_READY",
            EventKind::Recovery => "NODE_RECOVERED",
            EventKind::Mixed => "NODE_STATE_CHANGE",
        }
    }

    /// Incident-log status: anything with a node still going down stays open.
    pub fn recovery_status(self) -> &'static str {
        match self {
            EventKind::Recovery => "resolved",
            EventKind::Incident | EventKind::Mixed => "open",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Incident => "incident",
            EventKind::Recovery => "recovery",
            EventKind::Mixed => "mixed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit handed to dispatch and the incident log.
///
/// Serializes to a flat string-to-string object; node sets are
/// comma-joined in ascending order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingEvent {
    pub cluster: String,
    pub event_type: &'static str,
    pub event: EventKind,
    pub legacy_event: &'static str,
    pub status: &'static str,
    pub error_type: &'static str,
    pub error_code: &'static str,
    /// Every node known to be down at emit time, including ones that went
    /// down in this window and were deleted before it closed.
    #[serde(serialize_with = "join_nodes")]
    pub nodes_down: Vec<String>,
    /// Tracked nodes whose readiness is not `True` at emit time.
    #[serde(serialize_with = "join_nodes")]
    pub nodes_down_current: Vec<String>,
    #[serde(serialize_with = "join_nodes")]
    pub nodes_newly_down: Vec<String>,
    #[serde(serialize_with = "join_nodes")]
    pub nodes_recovered: Vec<String>,
    #[serde(serialize_with = "format_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub nodes_table: String,
    pub summary: String,
    pub details: String,
}

fn join_nodes<S: Serializer>(nodes: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&nodes.join(","))
}

fn format_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&render_timestamp(ts))
}

/// UTC with second precision and a `Z` suffix.
pub fn render_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Render a tab-separated table of every tracked node.
pub fn render_nodes_table(snapshot: &BTreeMap<String, ReadyState>) -> String {
    let mut lines = Vec::with_capacity(snapshot.len() + 1);
    lines.push("node\tready_status".to_string());
    for (node, state) in snapshot {
        lines.push(format!("{}\t{}", node, state));
    }
    lines.join("\n")
}

impl OutgoingEvent {
    /// Compose the event for a closed window against a fresh tracker snapshot.
    pub fn compose(
        cluster: &str,
        window: &DebounceWindow,
        snapshot: &BTreeMap<String, ReadyState>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let kind = window.kind();

        let down_current: BTreeSet<String> = snapshot
            .iter()
            .filter(|(_, state)| !state.is_ready())
            .map(|(node, _)| node.clone())
            .collect();
        let recovered = window.nodes_recovered();
        let down: BTreeSet<String> = down_current
            .iter()
            .cloned()
            .chain(window.nodes_went_down())
            .filter(|node| !recovered.contains(node))
            .collect();
        let newly_down = window.nodes_newly_down();

        let summary = render_summary(cluster, kind, &down, &recovered);
        let details = render_details(cluster, kind, window, &down_current, &newly_down, &recovered);

        Self {
            cluster: cluster.to_string(),
            event_type: "node",
            event: kind,
            legacy_event: kind.legacy_name(),
            status: kind.status(),
            error_type: kind.error_type(),
            error_code: kind.error_code(),
            nodes_down: down.into_iter().collect(),
            nodes_down_current: down_current.into_iter().collect(),
            nodes_newly_down: newly_down.into_iter().collect(),
            nodes_recovered: recovered.into_iter().collect(),
            timestamp,
            nodes_table: render_nodes_table(snapshot),
            summary,
            details,
        }
    }

    pub fn recovery_status(&self) -> &'static str {
        self.event.recovery_status()
    }
}

fn list(nodes: &BTreeSet<String>) -> String {
    if nodes.is_empty() {
        "none".to_string()
    } else {
        nodes.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

fn render_summary(
    cluster: &str,
    kind: EventKind,
    down: &BTreeSet<String>,
    recovered: &BTreeSet<String>,
) -> String {
    match kind {
        EventKind::Incident => format!(
            "[{}] {} node(s) not ready: {}",
            cluster,
            down.len(),
            list(down)
        ),
        EventKind::Recovery => format!(
            "[{}] {} node(s) recovered: {}",
            cluster,
            recovered.len(),
            list(recovered)
        ),
        EventKind::Mixed => format!(
            "[{}] node readiness changed: {} not ready ({}), {} recovered ({})",
            cluster,
            down.len(),
            list(down),
            recovered.len(),
            list(recovered)
        ),
    }
}

fn render_details(
    cluster: &str,
    kind: EventKind,
    window: &DebounceWindow,
    down_current: &BTreeSet<String>,
    newly_down: &BTreeSet<String>,
    recovered: &BTreeSet<String>,
) -> String {
    let mut lines = vec![
        format!("cluster: {}", cluster),
        format!("event: {}", kind),
        format!("window_opened_at: {}", render_timestamp(&window.opened_at)),
        format!("newly_down: {}", list(newly_down)),
        format!("recovered: {}", list(recovered)),
        format!("not_ready_now: {}", list(down_current)),
        "transitions:".to_string(),
    ];
    for t in window.transitions() {
        lines.push(format!(
            "  {} {} {} -> {} at {}",
            t.node_id,
            t.kind,
            t.from_state,
            t.to_state,
            render_timestamp(&t.occurred_at)
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debounce::DebounceAggregator;
    use crate::readiness::{Transition, TransitionKind};
    use chrono::TimeZone;
    use std::time::Duration;
    use tokio::time::Instant;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 15).unwrap()
    }

    fn transition(node: &str, kind: TransitionKind) -> Transition {
        let (from_state, to_state) = match kind {
            TransitionKind::Incident => (ReadyState::True, ReadyState::False),
            TransitionKind::Recovery => (ReadyState::False, ReadyState::True),
        };
        Transition {
            node_id: node.to_string(),
            kind,
            from_state,
            to_state,
            occurred_at: ts(),
        }
    }

    fn snapshot(entries: &[(&str, ReadyState)]) -> BTreeMap<String, ReadyState> {
        entries.iter().map(|(n, s)| (n.to_string(), *s)).collect()
    }

    fn compose(transitions: Vec<Transition>, snap: &BTreeMap<String, ReadyState>) -> OutgoingEvent {
        let mut agg = DebounceAggregator::new(Duration::from_secs(5));
        for t in transitions {
            agg.offer(t, Instant::now());
        }
        OutgoingEvent::compose("pi-k3s", &agg.close().unwrap(), snap, ts())
    }

    #[test]
    fn test_incident_payload() {
        let snap = snapshot(&[("n1", ReadyState::False), ("n2", ReadyState::True)]);
        let event = compose(vec![transition("n1", TransitionKind::Incident)], &snap);

        assert_eq!(event.event, EventKind::Incident);
        assert_eq!(event.status, "node-down");
        assert_eq!(event.nodes_down, vec!["n1"]);
        assert_eq!(event.nodes_newly_down, vec!["n1"]);
        assert!(event.nodes_recovered.is_empty());

        let payload = serde_json::to_value(&event).unwrap();
        assert_eq!(payload["event_type"], "node");
        assert_eq!(payload["event"], "incident");
        assert_eq!(payload["legacy_event"], "incident");
        assert_eq!(payload["error_type"], "node_not_ready");
        assert_eq!(payload["error_code"], "NODE_NOT_READY");
        assert_eq!(payload["timestamp"], "2024-03-01T08:30:15Z");
        assert_eq!(payload["nodes_table"], "node\tready_status\nn1\tFalse\nn2\tTrue");
        assert!(payload["summary"].as_str().unwrap().contains("n1"));
        assert!(payload["details"].as_str().unwrap().contains("n1 incident True -> False"));

        // Every value is a flat string.
        for (_, v) in payload.as_object().unwrap() {
            assert!(v.is_string());
        }
    }

    #[test]
    fn test_mixed_payload_keeps_down_sets_distinct() {
        let snap = snapshot(&[
            ("pi5d01", ReadyState::Unknown),
            ("pi5d03", ReadyState::True),
            ("pi5d04", ReadyState::False),
        ]);
        let event = compose(
            vec![
                transition("pi5d04", TransitionKind::Incident),
                transition("pi5d03", TransitionKind::Recovery),
                // Went down, then deleted before the window closed.
                transition("pi5d09", TransitionKind::Incident),
            ],
            &snap,
        );

        assert_eq!(event.event, EventKind::Mixed);
        assert_eq!(event.legacy_event, "mixed");
        assert_eq!(event.status, "node-change");
        assert_eq!(event.nodes_down, vec!["pi5d01", "pi5d04", "pi5d09"]);
        assert_eq!(event.nodes_down_current, vec!["pi5d01", "pi5d04"]);
        assert_eq!(event.nodes_newly_down, vec!["pi5d04", "pi5d09"]);
        assert_eq!(event.nodes_recovered, vec!["pi5d03"]);

        let payload = serde_json::to_value(&event).unwrap();
        assert_eq!(payload["nodes_down"], "pi5d01,pi5d04,pi5d09");
        assert_eq!(payload["nodes_recovered"], "pi5d03");
    }

    #[test]
    fn test_recovery_payload() {
        let snap = snapshot(&[("n1", ReadyState::True)]);
        let event = compose(vec![transition("n1", TransitionKind::Recovery)], &snap);

        assert_eq!(event.event, EventKind::Recovery);
        assert_eq!(event.legacy_event, "resolved");
        assert_eq!(event.error_code, "NODE_RECOVERED");
        assert_eq!(event.recovery_status(), "resolved");
        assert!(event.nodes_down.is_empty());
        assert_eq!(event.summary, "[pi-k3s] 1 node(s) recovered: n1");
    }
}
