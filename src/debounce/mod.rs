//! Debounce aggregation of readiness transitions.
//!
//! Transitions are merged into a single fixed-length window. The window
//! closes exactly one debounce period after its first transition no matter
//! how many more arrive, which bounds alert latency under flapping; a
//! transition arriving after the close starts a new window.

mod event;

pub use event::*;

use crate::readiness::{Transition, TransitionKind};

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::time::Instant;

/// Transitions accumulated since the window opened.
#[derive(Debug, Clone)]
pub struct DebounceWindow {
    pub opened_at: DateTime<Utc>,
    deadline: Instant,
    transitions: Vec<Transition>,
}

impl DebounceWindow {
    fn open(opened_at: DateTime<Utc>, deadline: Instant) -> Self {
        Self {
            opened_at,
            deadline,
            transitions: Vec::new(),
        }
    }

    /// Transitions in arrival order.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// `Mixed` if both kinds occurred, otherwise the single kind present.
    pub fn kind(&self) -> EventKind {
        let incident = self.transitions.iter().any(|t| t.kind == TransitionKind::Incident);
        let recovery = self.transitions.iter().any(|t| t.kind == TransitionKind::Recovery);
        match (incident, recovery) {
            (true, true) => EventKind::Mixed,
            (false, true) => EventKind::Recovery,
            _ => EventKind::Incident,
        }
    }

    /// Nodes whose first transition in this window was an incident.
    pub fn nodes_newly_down(&self) -> BTreeSet<String> {
        let mut first: BTreeMap<&str, TransitionKind> = BTreeMap::new();
        for t in &self.transitions {
            first.entry(t.node_id.as_str()).or_insert(t.kind);
        }
        collect_kind(first, TransitionKind::Incident)
    }

    /// Nodes whose latest transition in this window was an incident.
    pub fn nodes_went_down(&self) -> BTreeSet<String> {
        collect_kind(self.last_kinds(), TransitionKind::Incident)
    }

    /// Nodes whose latest transition in this window was a recovery.
    pub fn nodes_recovered(&self) -> BTreeSet<String> {
        collect_kind(self.last_kinds(), TransitionKind::Recovery)
    }

    fn last_kinds(&self) -> BTreeMap<&str, TransitionKind> {
        let mut last = BTreeMap::new();
        for t in &self.transitions {
            last.insert(t.node_id.as_str(), t.kind);
        }
        last
    }
}

fn collect_kind(kinds: BTreeMap<&str, TransitionKind>, wanted: TransitionKind) -> BTreeSet<String> {
    kinds
        .into_iter()
        .filter(|(_, kind)| *kind == wanted)
        .map(|(id, _)| id.to_string())
        .collect()
}

/// Owns the single active window slot.
#[derive(Debug)]
pub struct DebounceAggregator {
    period: Duration,
    window: Option<DebounceWindow>,
}

impl DebounceAggregator {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            window: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Add a transition, opening a window if none is active.
    ///
    /// Returns `true` when this call opened the window.
    pub fn offer(&mut self, transition: Transition, now: Instant) -> bool {
        let opened = self.window.is_none();
        let period = self.period;
        let window = self
            .window
            .get_or_insert_with(|| DebounceWindow::open(transition.occurred_at, now + period));
        window.transitions.push(transition);
        opened
    }

    /// When the active window closes, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.window.as_ref().map(|w| w.deadline)
    }

    pub fn is_open(&self) -> bool {
        self.window.is_some()
    }

    /// Number of transitions in the active window.
    pub fn pending(&self) -> usize {
        self.window.as_ref().map_or(0, |w| w.transitions.len())
    }

    /// Take the active window, leaving the slot empty.
    pub fn close(&mut self) -> Option<DebounceWindow> {
        self.window.take()
    }
}
