//! Append-only incident log.
//!
//! One NDJSON line per fired event. Writes go through a dedicated task so
//! records land in emit order and never hold up dispatch; write failures are
//! logged and dropped.

use crate::debounce::{render_timestamp, OutgoingEvent};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Pending records buffered before new ones are dropped.
const RECORD_QUEUE: usize = 256;

/// Incident log error types.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct IncidentRecord<'a> {
    #[serde(flatten)]
    event: &'a OutgoingEvent,
    recovery_status: &'static str,
    #[serde(serialize_with = "format_recorded_at")]
    recorded_at: DateTime<Utc>,
}

fn format_recorded_at<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&render_timestamp(ts))
}

/// Synchronous append-only NDJSON file.
#[derive(Debug, Clone)]
pub struct IncidentLog {
    path: PathBuf,
}

impl IncidentLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record for `event`.
    pub fn append(&self, event: &OutgoingEvent) -> Result<(), RecorderError> {
        let record = IncidentRecord {
            event,
            recovery_status: event.recovery_status(),
            recorded_at: Utc::now(),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }
}

/// Handle for queueing incident records. Cheap to clone.
#[derive(Clone)]
pub struct IncidentRecorder {
    tx: mpsc::Sender<OutgoingEvent>,
}

impl IncidentRecorder {
    /// Start the writer task. It exits once every handle is dropped and the
    /// queue is drained.
    pub fn spawn(log: IncidentLog) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(RECORD_QUEUE);
        tracing::info!("Incident log at {}", log.path().display());
        let handle = tokio::spawn(run_writer(rx, log));
        (Self { tx }, handle)
    }

    /// Queue a record without waiting.
    pub fn record(&self, event: &OutgoingEvent) {
        if let Err(e) = self.tx.try_send(event.clone()) {
            tracing::warn!(event = %event.event, "Incident record dropped: {}", e);
        }
    }
}

async fn run_writer(mut rx: mpsc::Receiver<OutgoingEvent>, log: IncidentLog) {
    while let Some(event) = rx.recv().await {
        let writer = log.clone();
        let result = tokio::task::spawn_blocking(move || {
            let result = writer.append(&event);
            (event, result)
        })
        .await;

        match result {
            Ok((event, Ok(()))) => tracing::debug!(
                event = %event.event,
                timestamp = %render_timestamp(&event.timestamp),
                "Incident recorded"
            ),
            Ok((event, Err(e))) => tracing::error!(
                event = %event.event,
                path = %log.path().display(),
                "Failed to append incident log: {}",
                e
            ),
            Err(e) => tracing::error!("Incident writer task failed: {}", e),
        }
    }
}
