//! Delivery of outgoing events to downstream automation endpoints.
//!
//! Each endpoint is attempted independently with its own retry budget; a
//! failing endpoint never blocks or fails the others.

mod airflow;
mod github;
mod retry;

pub use airflow::*;
pub use github::*;
pub use retry::*;

use crate::config::WatcherConfig;
use crate::debounce::OutgoingEvent;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Maximum number of response body bytes kept in an error.
const ERROR_BODY_LIMIT: usize = 500;

/// Dispatch error types.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("status={status} response={body}")]
    Status { status: u16, body: String },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DispatchError {
    /// Network errors, timeouts and 5xx responses are worth another attempt.
    /// Client errors and bad configuration are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Timeout(_) | DispatchError::Network(_) => true,
            DispatchError::Status { status, .. } => *status >= 500,
            DispatchError::Config(_) => false,
        }
    }

    fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            DispatchError::Timeout(timeout)
        } else {
            DispatchError::Network(e.to_string())
        }
    }
}

/// A downstream target that can receive one event per attempt.
#[async_trait]
pub trait Endpoint: Send + Sync {
    fn name(&self) -> &str;

    fn policy(&self) -> &RetryPolicy;

    /// Make a single delivery attempt.
    async fn attempt(&self, event: &OutgoingEvent) -> Result<(), DispatchError>;
}

/// Outcome of delivering one event to one endpoint.
#[derive(Debug)]
pub struct DeliveryReport {
    pub endpoint: String,
    pub attempts: u32,
    pub result: Result<(), DispatchError>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Deliver `event` to a single endpoint under its retry policy.
pub async fn send(event: &OutgoingEvent, endpoint: &dyn Endpoint) -> DeliveryReport {
    let (attempts, result) = endpoint
        .policy()
        .run(endpoint.name(), |_| endpoint.attempt(event))
        .await;

    match &result {
        Ok(()) => tracing::info!(
            endpoint = endpoint.name(),
            attempts,
            event = %event.event,
            "Event delivered"
        ),
        Err(e) => tracing::error!(
            endpoint = endpoint.name(),
            attempts,
            event = %event.event,
            error = %e,
            retryable = e.is_retryable(),
            "Event delivery failed"
        ),
    }

    DeliveryReport {
        endpoint: endpoint.name().to_string(),
        attempts,
        result,
    }
}

/// Fans an event out to every configured endpoint.
#[derive(Clone, Default)]
pub struct Dispatcher {
    endpoints: Vec<Arc<dyn Endpoint>>,
}

impl Dispatcher {
    pub fn new(endpoints: Vec<Arc<dyn Endpoint>>) -> Self {
        Self { endpoints }
    }

    /// Build the endpoints that have complete configuration.
    pub fn from_config(cfg: &WatcherConfig) -> Result<Self, DispatchError> {
        let mut endpoints: Vec<Arc<dyn Endpoint>> = Vec::new();

        if cfg.airflow.is_configured() {
            let endpoint = AirflowEndpoint::new(&cfg.airflow, cfg.airflow_policy())?;
            tracing::info!("Dispatch: Airflow DAG trigger at {}", endpoint.url());
            endpoints.push(Arc::new(endpoint));
        } else {
            tracing::warn!("Dispatch: Airflow trigger skipped, base URL or credentials missing");
        }

        if cfg.github.is_configured() {
            let endpoint = GithubDispatchEndpoint::new(&cfg.github, cfg.github_policy())?;
            tracing::info!("Dispatch: GitHub repository dispatch at {}", cfg.github.dispatch_url);
            endpoints.push(Arc::new(endpoint));
        } else {
            tracing::warn!("Dispatch: GitHub dispatch skipped, URL or token missing");
        }

        Ok(Self::new(endpoints))
    }

    pub fn endpoint_names(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.name().to_string()).collect()
    }

    /// Deliver to all endpoints concurrently and collect one report each.
    pub async fn dispatch(&self, event: &OutgoingEvent) -> Vec<DeliveryReport> {
        if self.endpoints.is_empty() {
            tracing::warn!(event = %event.event, "No dispatch endpoints configured, event not forwarded");
            return Vec::new();
        }

        futures::future::join_all(self.endpoints.iter().map(|e| send(event, e.as_ref()))).await
    }
}

/// Map a response to success or a status error carrying a truncated body.
async fn check_response(response: reqwest::Response) -> Result<(), DispatchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    Err(DispatchError::Status {
        status: status.as_u16(),
        body,
    })
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, DispatchError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("node-health-watcher/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| DispatchError::Config(e.to_string()))
}
