//! Kubernetes node watch source.

use super::NodeUpdate;
use crate::readiness::ReadyState;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::mpsc;

/// Cluster source error types.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("kubernetes client error: {0}")]
    Client(#[from] kube::Error),
}

/// Connect using in-cluster configuration, falling back to kubeconfig.
pub async fn connect() -> Result<Client, SourceError> {
    let client = Client::try_default().await?;
    tracing::info!("Kubernetes client ready (default namespace {})", client.default_namespace());
    Ok(client)
}

/// Stream node updates into `tx` until the receiver goes away.
///
/// The watcher relists and reconnects on its own with backoff; errors are
/// logged and the stream keeps going.
pub async fn run_node_source(client: Client, tx: mpsc::Sender<NodeUpdate>) {
    let api: Api<Node> = Api::all(client);
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();
    let mut relist = Relist::default();

    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Node watch stream error: {}", e);
                continue;
            }
        };

        for update in relist.translate(event) {
            if tx.send(update).await.is_err() {
                tracing::info!("Node update receiver closed, stopping watch");
                return;
            }
        }
    }
}

/// Tracks node names seen during a relist so missed deletions can be pruned.
#[derive(Debug, Default)]
struct Relist {
    seen: Option<HashSet<String>>,
}

impl Relist {
    fn translate(&mut self, event: watcher::Event<Node>) -> Vec<NodeUpdate> {
        match event {
            watcher::Event::Init => {
                tracing::debug!("Node relist started");
                self.seen = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(node) => {
                if let Some(seen) = self.seen.as_mut() {
                    seen.insert(node.name_any());
                }
                vec![node_update(&node)]
            }
            watcher::Event::InitDone => match self.seen.take() {
                Some(node_ids) => vec![NodeUpdate::Listed { node_ids }],
                None => Vec::new(),
            },
            watcher::Event::Apply(node) => vec![node_update(&node)],
            watcher::Event::Delete(node) => vec![NodeUpdate::Deleted {
                node_id: node.name_any(),
            }],
        }
    }
}

/// Extract the `Ready` condition from a node object.
pub fn node_update(node: &Node) -> NodeUpdate {
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"));

    let state = ReadyState::from_condition(ready.map(|c| c.status.as_str()));
    let heartbeat = ready.and_then(|c| c.last_heartbeat_time.as_ref()).map(|t| t.0);
    let changed_at = ready.and_then(|c| c.last_transition_time.as_ref()).map(|t| t.0);

    // The node controller does not bump the heartbeat when it marks a node
    // Unknown, so order by whichever timestamp is newer.
    let observed_at = match (heartbeat, changed_at) {
        (Some(h), Some(c)) => Some(h.max(c)),
        (h, c) => h.or(c),
    };

    NodeUpdate::Applied {
        node_id: node.name_any(),
        state,
        observed_at,
        changed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;

    fn node(name: &str, conditions: Option<Vec<(&str, &str)>>) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                conditions: conditions.map(|cs| {
                    cs.into_iter()
                        .map(|(type_, status)| NodeCondition {
                            type_: type_.to_string(),
                            status: status.to_string(),
                            ..Default::default()
                        })
                        .collect()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn state_of(update: NodeUpdate) -> ReadyState {
        match update {
            NodeUpdate::Applied { state, .. } => state,
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[test]
    fn test_ready_condition_is_extracted() {
        let n = node("pi5d04", Some(vec![("MemoryPressure", "False"), ("Ready", "False")]));
        assert_eq!(
            node_update(&n),
            NodeUpdate::Applied {
                node_id: "pi5d04".to_string(),
                state: ReadyState::False,
                observed_at: None,
                changed_at: None,
            }
        );

        assert_eq!(state_of(node_update(&node("a", Some(vec![("Ready", "True")])))), ReadyState::True);
        assert_eq!(state_of(node_update(&node("a", Some(vec![("Ready", "Unknown")])))), ReadyState::Unknown);
        assert_eq!(state_of(node_update(&node("a", Some(vec![("DiskPressure", "False")])))), ReadyState::Unknown);
        assert_eq!(state_of(node_update(&node("a", None))), ReadyState::Unknown);
    }

    fn with_times(mut n: Node, heartbeat: Option<Time>, transition: Option<Time>) -> Node {
        if let Some(conditions) = n.status.as_mut().and_then(|s| s.conditions.as_mut()) {
            for c in conditions.iter_mut().filter(|c| c.type_ == "Ready") {
                c.last_heartbeat_time = heartbeat.clone();
                c.last_transition_time = transition.clone();
            }
        }
        n
    }

    #[test]
    fn test_condition_timestamps_are_carried() {
        let heartbeat: Time = serde_json::from_str("\"2024-03-01T08:30:15Z\"").unwrap();
        let transition: Time = serde_json::from_str("\"2024-03-01T08:29:00Z\"").unwrap();
        let n = with_times(
            node("pi5d04", Some(vec![("Ready", "True")])),
            Some(heartbeat),
            Some(transition),
        );

        assert_eq!(
            node_update(&n),
            NodeUpdate::Applied {
                node_id: "pi5d04".to_string(),
                state: ReadyState::True,
                observed_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 15).unwrap()),
                changed_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 29, 0).unwrap()),
            }
        );
    }

    #[test]
    fn test_unknown_transition_is_newer_than_heartbeat() {
        // Marked Unknown by the controller: transition time moves, heartbeat does not.
        let heartbeat: Time = serde_json::from_str("\"2024-03-01T08:30:15Z\"").unwrap();
        let transition: Time = serde_json::from_str("\"2024-03-01T08:31:10Z\"").unwrap();
        let n = with_times(
            node("pi5d04", Some(vec![("Ready", "Unknown")])),
            Some(heartbeat),
            Some(transition),
        );

        let changed = Utc.with_ymd_and_hms(2024, 3, 1, 8, 31, 10).unwrap();
        match node_update(&n) {
            NodeUpdate::Applied {
                state,
                observed_at,
                changed_at,
                ..
            } => {
                assert_eq!(state, ReadyState::Unknown);
                assert_eq!(observed_at, Some(changed));
                assert_eq!(changed_at, Some(changed));
            }
            other => panic!("unexpected update: {:?}", other),
        }

        let heartbeat_only = with_times(
            node("pi5d03", Some(vec![("Ready", "True")])),
            Some(serde_json::from_str("\"2024-03-01T08:30:15Z\"").unwrap()),
            None,
        );
        match node_update(&heartbeat_only) {
            NodeUpdate::Applied {
                observed_at,
                changed_at,
                ..
            } => {
                assert_eq!(observed_at, Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 15).unwrap()));
                assert_eq!(changed_at, None);
            }
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[test]
    fn test_relist_reports_listed_nodes() {
        let mut relist = Relist::default();
        assert!(relist.translate(watcher::Event::Init).is_empty());
        relist.translate(watcher::Event::InitApply(node("a", None)));
        relist.translate(watcher::Event::InitApply(node("b", None)));

        let done = relist.translate(watcher::Event::InitDone);
        let expected: HashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        assert_eq!(done, vec![NodeUpdate::Listed { node_ids: expected }]);

        let deleted = relist.translate(watcher::Event::Delete(node("a", None)));
        assert_eq!(
            deleted,
            vec![NodeUpdate::Deleted {
                node_id: "a".to_string()
            }]
        );
    }
}
