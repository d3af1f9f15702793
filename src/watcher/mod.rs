//! Watch consumption loop.
//!
//! A single task owns the debounce window. It applies node updates to the
//! shared tracker, feeds classified transitions to the aggregator and, when
//! the window's deadline passes, emits one composed event on a channel.

mod delivery;
mod source;

pub use delivery::*;
pub use source::*;

use crate::debounce::{DebounceAggregator, OutgoingEvent};
use crate::readiness::{ReadinessTracker, ReadyState, Transition};

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One item from the cluster watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeUpdate {
    /// A node was added or modified.
    Applied {
        node_id: String,
        state: ReadyState,
        /// Ordering timestamp for last-write-wins.
        observed_at: Option<DateTime<Utc>>,
        /// When the Ready condition last changed.
        changed_at: Option<DateTime<Utc>>,
    },
    /// A node was deleted from the cluster.
    Deleted { node_id: String },
    /// A full relist completed; nodes not in the list no longer exist.
    Listed { node_ids: HashSet<String> },
}

/// State shared between the watch loop and the status server.
#[derive(Debug, Default)]
pub struct WatcherState {
    tracker: RwLock<ReadinessTracker>,
    last_event: RwLock<Option<OutgoingEvent>>,
    pending: RwLock<usize>,
}

impl WatcherState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracker(&self) -> RwLockReadGuard<'_, ReadinessTracker> {
        self.tracker.read().unwrap_or_else(|e| e.into_inner())
    }

    fn tracker_mut(&self) -> RwLockWriteGuard<'_, ReadinessTracker> {
        self.tracker.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Most recently emitted event.
    pub fn last_event(&self) -> Option<OutgoingEvent> {
        self.last_event.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Transitions waiting in the open window, zero if none is open.
    pub fn pending_transitions(&self) -> usize {
        *self.pending.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_pending(&self, count: usize) {
        *self.pending.write().unwrap_or_else(|e| e.into_inner()) = count;
    }

    fn set_last_event(&self, event: &OutgoingEvent) {
        *self.last_event.write().unwrap_or_else(|e| e.into_inner()) = Some(event.clone());
    }
}

/// Consumes node updates and emits debounced events.
pub struct NodeWatcher {
    cluster: String,
    state: Arc<WatcherState>,
    aggregator: DebounceAggregator,
    events: mpsc::Sender<OutgoingEvent>,
}

impl NodeWatcher {
    pub fn new(
        cluster: &str,
        debounce: Duration,
        state: Arc<WatcherState>,
        events: mpsc::Sender<OutgoingEvent>,
    ) -> Self {
        Self {
            cluster: cluster.to_string(),
            state,
            aggregator: DebounceAggregator::new(debounce),
            events,
        }
    }

    /// Run until the update channel closes. A window still open at that
    /// point is closed early so its event is not lost.
    pub async fn run(mut self, mut updates: mpsc::Receiver<NodeUpdate>) {
        tracing::info!(
            cluster = %self.cluster,
            debounce_seconds = self.aggregator.period().as_secs(),
            "Node watcher started"
        );

        loop {
            let deadline = self.aggregator.deadline();
            tokio::select! {
                biased;
                _ = wait_for(deadline) => {
                    self.close_window().await;
                }
                update = updates.recv() => match update {
                    Some(update) => self.handle_update(update),
                    None => {
                        if self.aggregator.is_open() {
                            tracing::info!("Update stream closed, flushing open debounce window");
                            self.close_window().await;
                        }
                        break;
                    }
                }
            }
        }

        tracing::info!("Node watcher stopped");
    }

    fn handle_update(&mut self, update: NodeUpdate) {
        match update {
            NodeUpdate::Applied {
                node_id,
                state,
                observed_at,
                changed_at,
            } => self.apply(&node_id, state, observed_at, changed_at),
            NodeUpdate::Deleted { node_id } => {
                let previous = self.state.tracker_mut().remove(&node_id);
                tracing::info!(
                    node = %node_id,
                    last_status = ?previous,
                    "Node deleted"
                );
            }
            NodeUpdate::Listed { node_ids } => {
                let removed = self.state.tracker_mut().retain_listed(&node_ids);
                tracing::info!(nodes = node_ids.len(), "Node list synchronized");
                if !removed.is_empty() {
                    tracing::info!(nodes = ?removed, "Dropped nodes missing from relist");
                }
            }
        }
    }

    fn apply(
        &mut self,
        node_id: &str,
        state: ReadyState,
        observed_at: Option<DateTime<Utc>>,
        changed_at: Option<DateTime<Utc>>,
    ) {
        let previous = self.state.tracker_mut().apply(node_id, state, observed_at);

        let previous_state = match previous {
            None => {
                tracing::info!(node = node_id, status = %state, "Node first observed");
                return;
            }
            Some(p) if p == state => return,
            Some(p) => p,
        };

        let occurred_at = changed_at.or(observed_at).unwrap_or_else(Utc::now);
        let transition = match Transition::detect(node_id, previous, state, occurred_at) {
            Some(t) => t,
            None => {
                tracing::debug!(
                    node = node_id,
                    previous = %previous_state,
                    current = %state,
                    "Non-actionable node state change"
                );
                return;
            }
        };

        let kind = transition.kind;
        let opened = self.aggregator.offer(transition, Instant::now());
        self.state.set_pending(self.aggregator.pending());

        tracing::info!(
            node = node_id,
            transition = %kind,
            previous = %previous_state,
            current = %state,
            pending = self.aggregator.pending(),
            window_opened = opened,
            "Node transition detected"
        );
    }

    async fn close_window(&mut self) {
        let window = match self.aggregator.close() {
            Some(w) => w,
            None => return,
        };
        self.state.set_pending(0);

        let snapshot = self.state.tracker().snapshot();
        let event = OutgoingEvent::compose(&self.cluster, &window, &snapshot, Utc::now());

        tracing::info!(
            event = %event.event,
            transitions = window.transitions().len(),
            nodes_down = ?event.nodes_down,
            nodes_recovered = ?event.nodes_recovered,
            "Debounce window closed"
        );

        self.state.set_last_event(&event);
        if self.events.send(event).await.is_err() {
            tracing::error!("Event channel closed, dropping event");
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
