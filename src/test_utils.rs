//! Test utilities and mock implementations.
//!
//! Mocks of the outbound workflow engine plus fixtures for source catalog
//! entries, so coordinator and dispatcher tests run without a network.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::eligibility::InMemorySourceCatalog;
use crate::model::{OpenPolicy, SourceRecord, Submitter};
use crate::sequence::ApplySequenceSource;
use crate::workflow::{ApplyPayload, Result as WorkflowResult, WorkflowEngine, WorkflowError};

/// A submission the mock engine received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedInstance {
    pub correlation_id: String,
    pub process_key: String,
    pub payload: ApplyPayload,
}

/// Mock workflow engine that records every call.
#[derive(Default)]
pub struct MockWorkflowEngine {
    submitted: RwLock<Vec<SubmittedInstance>>,
    cancelled: RwLock<Vec<(String, String)>>,
    fail_on_submit: RwLock<bool>,
    fail_on_cancel: RwLock<bool>,
    delay: RwLock<Option<Duration>>,
}

impl MockWorkflowEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_submit(&self, fail: bool) {
        *self.fail_on_submit.write().await = fail;
    }

    pub async fn set_fail_on_cancel(&self, fail: bool) {
        *self.fail_on_cancel.write().await = fail;
    }

    /// Make every call sleep before answering.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().await = delay;
    }

    pub async fn submit_count(&self) -> usize {
        self.submitted.read().await.len()
    }

    pub async fn cancel_count(&self) -> usize {
        self.cancelled.read().await.len()
    }

    pub async fn submitted(&self) -> Vec<SubmittedInstance> {
        self.submitted.read().await.clone()
    }

    pub async fn cancelled(&self) -> Vec<(String, String)> {
        self.cancelled.read().await.clone()
    }

    async fn pause(&self) {
        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl WorkflowEngine for MockWorkflowEngine {
    async fn submit(
        &self,
        correlation_id: &str,
        process_key: &str,
        payload: &ApplyPayload,
    ) -> WorkflowResult<()> {
        self.pause().await;
        if *self.fail_on_submit.read().await {
            return Err(WorkflowError::Unavailable("Mock submit failure".to_string()));
        }
        self.submitted.write().await.push(SubmittedInstance {
            correlation_id: correlation_id.to_string(),
            process_key: process_key.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn cancel(&self, correlation_id: &str, reason: &str) -> WorkflowResult<()> {
        self.pause().await;
        if *self.fail_on_cancel.read().await {
            return Err(WorkflowError::Unavailable("Mock cancel failure".to_string()));
        }
        self.cancelled
            .write()
            .await
            .push((correlation_id.to_string(), reason.to_string()));
        Ok(())
    }
}

/// Sequence source handing out consecutive values.
pub struct CountingSequence {
    next: AtomicU64,
}

impl CountingSequence {
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl ApplySequenceSource for CountingSequence {
    fn next_sequence(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// An online source entry with an `allowed` open policy.
pub fn online_source(id: &str) -> SourceRecord {
    SourceRecord {
        id: id.to_string(),
        title: format!("Catalog {id}"),
        online: true,
        open_policy: OpenPolicy::Allowed,
    }
}

pub fn submitter() -> Submitter {
    Submitter {
        id: 7,
        name: "catalog-admin".to_string(),
    }
}

/// Source catalog seeded with the given entries.
pub async fn source_catalog(sources: impl IntoIterator<Item = SourceRecord>) -> InMemorySourceCatalog {
    let catalog = InMemorySourceCatalog::new();
    for source in sources {
        catalog.insert(source).await;
    }
    catalog
}
