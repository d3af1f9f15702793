//! Airflow DAG run trigger.

use super::{build_client, check_response, DispatchError, Endpoint, RetryPolicy};
use crate::config::AirflowSettings;
use crate::debounce::OutgoingEvent;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Serialize)]
struct DagRunRequest<'a> {
    conf: &'a OutgoingEvent,
}

/// Triggers `POST /api/v1/dags/{dag_id}/dagRuns` with the event as `conf`.
pub struct AirflowEndpoint {
    client: reqwest::Client,
    url: String,
    username: String,
    password: String,
    policy: RetryPolicy,
}

impl AirflowEndpoint {
    pub fn new(settings: &AirflowSettings, policy: RetryPolicy) -> Result<Self, DispatchError> {
        if settings.base_url.is_empty() {
            return Err(DispatchError::Config("Airflow base URL is empty".to_string()));
        }

        Ok(Self {
            client: build_client(policy.attempt_timeout)?,
            url: format!(
                "{}/api/v1/dags/{}/dagRuns",
                settings.base_url.trim_end_matches('/'),
                settings.dag_id
            ),
            username: settings.username.clone(),
            password: settings.password.clone(),
            policy,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Endpoint for AirflowEndpoint {
    fn name(&self) -> &str {
        "airflow"
    }

    fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn attempt(&self, event: &OutgoingEvent) -> Result<(), DispatchError> {
        let timeout = self.policy.attempt_timeout;
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&DagRunRequest { conf: event })
            .send()
            .await
            .map_err(|e| DispatchError::from_reqwest(e, timeout))?;

        check_response(response).await
    }
}
