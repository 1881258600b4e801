//! HTTP client for the workflow engine.
//!
//! POSTs JSON to `{endpoint}/instances` to start an audit and to
//! `{endpoint}/instances/{correlation_id}/cancel` to withdraw one.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::{ApplyPayload, Result, WorkflowConfig, WorkflowEngine, WorkflowError};

#[derive(Serialize)]
struct SubmitRequest<'a> {
    correlation_id: &'a str,
    process_key: &'a str,
    #[serde(flatten)]
    payload: &'a ApplyPayload,
}

#[derive(Serialize)]
struct CancelRequest<'a> {
    reason: &'a str,
}

/// Workflow engine reached over HTTP.
pub struct HttpWorkflowEngine {
    client: Client,
    endpoint: String,
    connect_retries: usize,
}

impl HttpWorkflowEngine {
    pub fn new(config: &WorkflowConfig) -> Result<Self> {
        if config.endpoint.is_empty() {
            return Err(WorkflowError::Config(
                "workflow endpoint not configured".to_string(),
            ));
        }

        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            connect_retries: config.connect_retries,
        })
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.connect_retries)
            .with_jitter()
    }

    /// Only a refused connection is known not to have reached the engine.
    fn is_retryable(err: &WorkflowError) -> bool {
        matches!(err, WorkflowError::Http(e) if e.is_connect())
    }

    async fn post_json<T: Serialize + Sync>(&self, url: &str, body: &T) -> Result<()> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();

        if status.is_success() {
            debug!(url = %url, status = %status, "Workflow engine accepted request");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let detail = format!(
            "HTTP {} - {}",
            status,
            body.chars().take(200).collect::<String>()
        );
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!(url = %url, status = %status, "Workflow engine unavailable");
            Err(WorkflowError::Unavailable(detail))
        } else {
            error!(url = %url, status = %status, body = %body, "Workflow engine rejected request");
            Err(WorkflowError::Rejected(detail))
        }
    }

    async fn post_with_retry<T: Serialize + Sync>(&self, url: &str, body: &T) -> Result<()> {
        (|| async { self.post_json(url, body).await })
            .retry(self.backoff())
            .when(Self::is_retryable)
            .notify(|err, dur| {
                warn!(url = %url, error = %err, delay = ?dur, "Workflow engine unreachable, retrying");
            })
            .await
    }
}

#[async_trait]
impl WorkflowEngine for HttpWorkflowEngine {
    async fn submit(
        &self,
        correlation_id: &str,
        process_key: &str,
        payload: &ApplyPayload,
    ) -> Result<()> {
        let url = format!("{}/instances", self.endpoint);
        let request = SubmitRequest {
            correlation_id,
            process_key,
            payload,
        };
        self.post_with_retry(&url, &request).await
    }

    async fn cancel(&self, correlation_id: &str, reason: &str) -> Result<()> {
        let url = format!("{}/instances/{}/cancel", self.endpoint, correlation_id);
        self.post_with_retry(&url, &CancelRequest { reason }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Submitter;
    use chrono::Utc;

    #[test]
    fn test_empty_endpoint_rejected() {
        let config = WorkflowConfig {
            endpoint: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            HttpWorkflowEngine::new(&config),
            Err(WorkflowError::Config(_))
        ));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = WorkflowConfig {
            endpoint: "http://engine:8088/".to_string(),
            ..Default::default()
        };
        let engine = HttpWorkflowEngine::new(&config).unwrap();
        assert_eq!(engine.endpoint, "http://engine:8088");
    }

    #[test]
    fn test_submit_body_is_flat() {
        let payload = ApplyPayload {
            title: "Census".to_string(),
            submitter: Submitter {
                id: 1,
                name: "ann".to_string(),
            },
            submitted_at: Utc::now(),
        };
        let body = serde_json::to_value(SubmitRequest {
            correlation_id: "AAAAAAAAAAEAAAAAAAAAAg",
            process_key: "P9",
            payload: &payload,
        })
        .unwrap();
        assert_eq!(body["process_key"], "P9");
        assert_eq!(body["title"], "Census");
        assert_eq!(body["submitter"]["name"], "ann");
    }

    #[test]
    fn test_rejection_is_not_retried() {
        assert!(!HttpWorkflowEngine::is_retryable(&WorkflowError::Rejected(
            "HTTP 400".to_string()
        )));
        assert!(!HttpWorkflowEngine::is_retryable(&WorkflowError::Unavailable(
            "HTTP 503".to_string()
        )));
    }

    #[tokio::test]
    async fn test_refused_connection_fails_after_retries() {
        // Port 9 (discard) on loopback is not expected to accept connections.
        let config = WorkflowConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            connect_retries: 1,
            timeout_secs: 2,
            ..Default::default()
        };
        let engine = HttpWorkflowEngine::new(&config).unwrap();
        let result = engine.cancel("AAAAAAAAAAEAAAAAAAAAAg", "withdrawn").await;
        assert!(result.is_err());
    }
}
