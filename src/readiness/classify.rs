//! Transition classification.

use super::ReadyState;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Direction of a readiness change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    /// Ready -> not ready.
    Incident,
    /// Not ready -> ready.
    Recovery,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionKind::Incident => f.write_str("incident"),
            TransitionKind::Recovery => f.write_str("recovery"),
        }
    }
}

/// A classified readiness change for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub node_id: String,
    pub kind: TransitionKind,
    pub from_state: ReadyState,
    pub to_state: ReadyState,
    pub occurred_at: DateTime<Utc>,
}

/// Classify a readiness change.
///
/// A first observation (`old` is `None`) only establishes the baseline and
/// never produces a transition, so nodes that are already down at startup do
/// not raise incidents.
pub fn classify(old: Option<ReadyState>, new: ReadyState) -> Option<TransitionKind> {
    let old = old?;
    match (old.is_ready(), new.is_ready()) {
        (true, false) => Some(TransitionKind::Incident),
        (false, true) => Some(TransitionKind::Recovery),
        _ => None,
    }
}

impl Transition {
    /// Build a transition for `node_id` if the state change is actionable.
    pub fn detect(
        node_id: &str,
        old: Option<ReadyState>,
        new: ReadyState,
        occurred_at: DateTime<Utc>,
    ) -> Option<Self> {
        let kind = classify(old, new)?;
        Some(Self {
            node_id: node_id.to_string(),
            kind,
            from_state: old?,
            to_state: new,
            occurred_at,
        })
    }
}
