//! Node readiness state and transition detection.
//!
//! The tracker keeps one current readiness value per node; the classifier
//! turns an (old, new) pair into an incident or recovery transition.

mod classify;
mod tracker;

pub use classify::*;
pub use tracker::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value of a node's `Ready` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadyState {
    True,
    False,
    Unknown,
}

impl ReadyState {
    /// Map a condition status string. Anything other than `True`/`False`
    /// (including a missing condition) is `Unknown`.
    pub fn from_condition(status: Option<&str>) -> Self {
        match status {
            Some("True") => ReadyState::True,
            Some("False") => ReadyState::False,
            _ => ReadyState::Unknown,
        }
    }

    pub fn is_ready(self) -> bool {
        self == ReadyState::True
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReadyState::True => "True",
            ReadyState::False => "False",
            ReadyState::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest known readiness of a single node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReadiness {
    pub node_id: String,
    pub ready_state: ReadyState,
    /// Timestamp reported with the update, if the source carried one.
    pub observed_at: Option<DateTime<Utc>>,
}
