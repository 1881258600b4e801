//! Outbound contract with the external workflow engine.
//!
//! The engine is handed an opaque correlation ID with every submission and
//! echoes it back in the callbacks it later emits. Submissions are
//! at-least-once from the engine's point of view: a call that timed out here
//! may still have created an instance remotely, so engines are expected to
//! deduplicate by correlation ID.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Submitter, OPEN_CATALOG_AUDIT_TYPE};

pub mod http;

pub use http::HttpWorkflowEngine;

/// Result type for workflow engine calls.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors returned by a workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow engine not configured: {0}")]
    Config(String),

    #[error("Workflow engine unavailable: {0}")]
    Unavailable(String),

    #[error("Workflow engine rejected request: {0}")]
    Rejected(String),

    #[error("Workflow engine call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Display data shown to reviewers in the external engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyPayload {
    pub title: String,
    pub submitter: Submitter,
    pub submitted_at: DateTime<Utc>,
}

/// Outbound calls into the workflow engine.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Start an audit instance of `process_key` for `correlation_id`.
    async fn submit(
        &self,
        correlation_id: &str,
        process_key: &str,
        payload: &ApplyPayload,
    ) -> Result<()>;

    /// Withdraw the instance started for `correlation_id`.
    async fn cancel(&self, correlation_id: &str, reason: &str) -> Result<()>;
}

/// Workflow configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Base URL of the engine's HTTP API.
    pub endpoint: String,
    /// Upper bound for a single engine call, in seconds.
    pub timeout_secs: u64,
    /// Retries after a refused connection.
    pub connect_retries: usize,
    /// Audit type under which open-catalog requests are bound.
    pub audit_type: String,
    /// Audit type to process definition key.
    pub bindings: HashMap<String, String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8088".to_string(),
            timeout_secs: 10,
            connect_retries: 3,
            audit_type: OPEN_CATALOG_AUDIT_TYPE.to_string(),
            bindings: HashMap::new(),
        }
    }
}

impl WorkflowConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkflowConfig::default();
        assert_eq!(config.audit_type, "open_catalog");
        assert_eq!(config.timeout(), std::time::Duration::from_secs(10));
        assert!(config.bindings.is_empty());
    }

    #[test]
    fn test_payload_serializes_submitter() {
        let payload = ApplyPayload {
            title: "Census".to_string(),
            submitter: Submitter {
                id: 3,
                name: "reviewer".to_string(),
            },
            submitted_at: Utc::now(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["title"], "Census");
        assert_eq!(json["submitter"]["id"], 3);
    }
}
