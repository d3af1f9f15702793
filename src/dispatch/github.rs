//! GitHub repository dispatch webhook.

use super::{build_client, check_response, DispatchError, Endpoint, RetryPolicy};
use crate::config::GithubSettings;
use crate::debounce::OutgoingEvent;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Serialize)]
struct DispatchRequest<'a> {
    event_type: &'a str,
    client_payload: &'a OutgoingEvent,
}

/// Posts a `repository_dispatch` event carrying the payload as `client_payload`.
///
/// GitHub allows at most 10 top-level `client_payload` properties and answers
/// larger payloads with 422, which is reported as a non-retryable failure.
pub struct GithubDispatchEndpoint {
    client: reqwest::Client,
    url: String,
    token: String,
    event_type: String,
    policy: RetryPolicy,
}

impl GithubDispatchEndpoint {
    pub fn new(settings: &GithubSettings, policy: RetryPolicy) -> Result<Self, DispatchError> {
        if settings.dispatch_url.is_empty() {
            return Err(DispatchError::Config("GitHub dispatch URL is empty".to_string()));
        }

        Ok(Self {
            client: build_client(policy.attempt_timeout)?,
            url: settings.dispatch_url.clone(),
            token: settings.token.clone(),
            event_type: settings.event_type.clone(),
            policy,
        })
    }
}

#[async_trait]
impl Endpoint for GithubDispatchEndpoint {
    fn name(&self) -> &str {
        "github"
    }

    fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn attempt(&self, event: &OutgoingEvent) -> Result<(), DispatchError> {
        let timeout = self.policy.attempt_timeout;
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::AUTHORIZATION, format!("token {}", self.token))
            .json(&DispatchRequest {
                event_type: &self.event_type,
                client_payload: event,
            })
            .send()
            .await
            .map_err(|e| DispatchError::from_reqwest(e, timeout))?;

        check_response(response).await
    }
}
