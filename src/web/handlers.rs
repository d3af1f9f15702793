//! HTTP request handlers.

use super::AppState;
use crate::debounce::OutgoingEvent;
use crate::readiness::NodeReadiness;

use axum::{extract::State, response::Json};
use serde::Serialize;

pub async fn handle_healthz() -> &'static str {
    "ok"
}

pub async fn handle_nodes(State(state): State<AppState>) -> Json<Vec<NodeReadiness>> {
    Json(state.watcher.tracker().nodes())
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub cluster: String,
    pub nodes: usize,
    pub nodes_down_current: Vec<String>,
    pub window_open: bool,
    pub pending_transitions: usize,
    pub endpoints: Vec<String>,
    pub last_event: Option<OutgoingEvent>,
}

pub async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let (nodes, nodes_down_current) = {
        let tracker = state.watcher.tracker();
        let down = tracker
            .snapshot()
            .into_iter()
            .filter(|(_, s)| !s.is_ready())
            .map(|(id, _)| id)
            .collect();
        (tracker.len(), down)
    };
    let pending = state.watcher.pending_transitions();

    Json(StatusResponse {
        cluster: state.cluster.clone(),
        nodes,
        nodes_down_current,
        window_open: pending > 0,
        pending_transitions: pending,
        endpoints: state.endpoints.clone(),
        last_event: state.watcher.last_event(),
    })
}
