//! Audit submission coordinator.
//!
//! Synchronous entry points for user actions on open-catalog records. Every
//! action that reaches the workflow engine follows the same ordering:
//!
//! 1. begin a store transaction and write the intended local state;
//! 2. call the engine (bounded by a timeout);
//! 3. commit only if the engine accepted, otherwise roll back.
//!
//! A record is therefore never durably `Auditing` without the engine having
//! accepted its submission, and a failed cancel leaves the audit running.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::correlation::{CorrelationError, CorrelationId};
use crate::eligibility::{
    check_eligible, IneligibleReason, ProcessBindings, SourceCatalog, StaticProcessBindings,
};
use crate::model::{AuditState, NewRecord, OpenCatalogRecord, Submitter, OPEN_CATALOG_AUDIT_TYPE};
use crate::sequence::{ApplySequenceSource, TimeOrderedSequence};
use crate::storage::{OpenCatalogStore, StorageError, StoreTransaction};
use crate::workflow::{self, ApplyPayload, HttpWorkflowEngine, WorkflowEngine, WorkflowError};

/// Default upper bound for a single workflow engine call.
pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, AuditError>;

/// Errors returned to callers of the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Source catalog not eligible for opening: {0}")]
    NotEligible(IneligibleReason),

    #[error("Source catalog not found: {0}")]
    SourceNotFound(String),

    #[error("Open request already exists for source catalog {0}")]
    DuplicateOpenRequest(String),

    #[error("Open-catalog record not found: id={0}")]
    RecordNotFound(u64),

    #[error("Record {id} cannot be resubmitted while {state}")]
    ResubmitNotAllowed { id: u64, state: AuditState },

    #[error("Record {id} cannot be cancelled while {state}")]
    AuditCancelNotAllowed { id: u64, state: AuditState },

    #[error("Audit submission failed: {0}")]
    AuditSubmissionFailed(#[source] WorkflowError),

    #[error("Audit cancel failed: {0}")]
    AuditCancelFailed(#[source] WorkflowError),

    #[error("Record {0} cannot be deleted while opened or under audit")]
    ResourceDeleteNotAllowed(u64),

    #[error("Malformed correlation ID: {0}")]
    MalformedCorrelationId(#[from] CorrelationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// A request to publish a source catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub source_id: String,
    pub submitter: Submitter,
}

impl OpenRequest {
    pub fn new(source_id: impl Into<String>, submitter: Submitter) -> Self {
        Self {
            source_id: source_id.into(),
            submitter,
        }
    }
}

/// A batch item that could not be submitted.
#[derive(Debug)]
pub struct BatchFailure {
    pub source_id: String,
    pub error: AuditError,
}

/// Per-item results of [`AuditCoordinator::submit_batch`].
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<OpenCatalogRecord>,
    pub failed: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives create, update, cancel and delete of open-catalog records.
pub struct AuditCoordinator {
    store: Arc<dyn OpenCatalogStore>,
    sources: Arc<dyn SourceCatalog>,
    bindings: Arc<dyn ProcessBindings>,
    engine: Arc<dyn WorkflowEngine>,
    sequence: Arc<dyn ApplySequenceSource>,
    audit_type: String,
    engine_timeout: Duration,
}

impl AuditCoordinator {
    pub fn new(
        store: Arc<dyn OpenCatalogStore>,
        sources: Arc<dyn SourceCatalog>,
        bindings: Arc<dyn ProcessBindings>,
        engine: Arc<dyn WorkflowEngine>,
    ) -> Self {
        Self {
            store,
            sources,
            bindings,
            engine,
            sequence: Arc::new(TimeOrderedSequence::new()),
            audit_type: OPEN_CATALOG_AUDIT_TYPE.to_string(),
            engine_timeout: DEFAULT_ENGINE_TIMEOUT,
        }
    }

    /// Build a coordinator talking to the HTTP engine described by `config`.
    ///
    /// Process bindings, audit type and engine timeout all come from the
    /// `workflow` section.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn OpenCatalogStore>,
        sources: Arc<dyn SourceCatalog>,
    ) -> std::result::Result<Self, WorkflowError> {
        let workflow = &config.workflow;
        let engine = HttpWorkflowEngine::new(workflow)?;
        let bindings = StaticProcessBindings::new(workflow.bindings.clone());

        if workflow.timeout() >= config.storage.busy_timeout() {
            warn!(
                engine_timeout_secs = workflow.timeout_secs,
                busy_timeout_secs = config.storage.busy_timeout_secs,
                "Engine timeout not below storage busy timeout; callbacks may fail during submissions"
            );
        }

        info!(
            endpoint = %workflow.endpoint,
            audit_type = %workflow.audit_type,
            bindings = workflow.bindings.len(),
            "Audit coordinator configured"
        );

        Ok(Self::new(store, sources, Arc::new(bindings), Arc::new(engine))
            .with_audit_type(workflow.audit_type.clone())
            .with_engine_timeout(workflow.timeout()))
    }

    pub fn with_sequence(mut self, sequence: Arc<dyn ApplySequenceSource>) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_audit_type(mut self, audit_type: impl Into<String>) -> Self {
        self.audit_type = audit_type.into();
        self
    }

    pub fn with_engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = timeout;
        self
    }

    pub async fn get(&self, id: u64) -> Result<OpenCatalogRecord> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or(AuditError::RecordNotFound(id))
    }

    pub async fn get_by_source(&self, source_id: &str) -> Result<Option<OpenCatalogRecord>> {
        Ok(self.store.get_by_source_id(source_id).await?)
    }

    /// Open a source catalog entry for the first time.
    #[tracing::instrument(name = "audit.submit_create", skip_all, fields(source_id = %request.source_id))]
    pub async fn submit_create(&self, request: &OpenRequest) -> Result<OpenCatalogRecord> {
        let title = self.eligible_title(&request.source_id).await?;
        let process_key = self.bindings.resolve_bound_process(&self.audit_type).await?;
        let now = Utc::now();

        let mut tx = self.store.begin().await?;

        match tx.get_by_source_id(&request.source_id).await {
            Ok(Some(existing)) => {
                abort(&mut *tx).await;
                debug!(record_id = existing.id, "Open request already exists");
                return Err(AuditError::DuplicateOpenRequest(request.source_id.clone()));
            }
            Ok(None) => {}
            Err(e) => {
                abort(&mut *tx).await;
                return Err(e.into());
            }
        }

        let Some(process_key) = process_key else {
            let record = NewRecord::opened(&request.source_id, now, request.submitter.id);
            let created = match tx.create(record).await {
                Ok(created) => created,
                Err(e) => {
                    abort(&mut *tx).await;
                    return Err(map_create_error(e, &request.source_id));
                }
            };
            tx.commit().await?;
            info!(record_id = created.id, "No audit process bound, opened directly");
            return Ok(created);
        };

        let apply_sequence = self.sequence.next_sequence();
        let record = NewRecord::auditing(
            &request.source_id,
            apply_sequence,
            &process_key,
            now,
            request.submitter.id,
        );
        let created = match tx.create(record).await {
            Ok(created) => created,
            Err(e) => {
                abort(&mut *tx).await;
                return Err(map_create_error(e, &request.source_id));
            }
        };

        let payload = ApplyPayload {
            title,
            submitter: request.submitter.clone(),
            submitted_at: now,
        };
        self.send_submission(tx, created.id, apply_sequence, &process_key, &payload)
            .await?;
        Ok(created)
    }

    /// Resubmit an existing record that is not opened and not under audit.
    #[tracing::instrument(name = "audit.submit_update", skip_all, fields(record_id = id))]
    pub async fn submit_update(&self, id: u64, submitter: &Submitter) -> Result<OpenCatalogRecord> {
        let current = self.get(id).await?;
        ensure_resubmittable(&current)?;

        let title = self.eligible_title(&current.source_id).await?;
        let process_key = self.bindings.resolve_bound_process(&self.audit_type).await?;
        let now = Utc::now();

        let mut tx = self.store.begin().await?;

        // The state may have moved between the read above and the lock.
        let mut record = match tx.get_by_id(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                abort(&mut *tx).await;
                return Err(AuditError::RecordNotFound(id));
            }
            Err(e) => {
                abort(&mut *tx).await;
                return Err(e.into());
            }
        };
        if let Err(e) = ensure_resubmittable(&record) {
            abort(&mut *tx).await;
            return Err(e);
        }

        let Some(process_key) = process_key else {
            record.mark_opened(now, submitter.id);
            if let Err(e) = tx.save(&record).await {
                abort(&mut *tx).await;
                return Err(e.into());
            }
            tx.commit().await?;
            info!(record_id = id, "No audit process bound, opened directly");
            return Ok(record);
        };

        let apply_sequence = self.sequence.next_sequence();
        record.mark_auditing(apply_sequence, &process_key, now, submitter.id);
        if let Err(e) = tx.save(&record).await {
            abort(&mut *tx).await;
            return Err(e.into());
        }

        let payload = ApplyPayload {
            title,
            submitter: submitter.clone(),
            submitted_at: now,
        };
        self.send_submission(tx, id, apply_sequence, &process_key, &payload)
            .await?;
        Ok(record)
    }

    /// Withdraw a record from an audit in progress.
    #[tracing::instrument(name = "audit.cancel", skip_all, fields(record_id = id))]
    pub async fn cancel(
        &self,
        id: u64,
        submitter: &Submitter,
        reason: &str,
    ) -> Result<OpenCatalogRecord> {
        let mut tx = self.store.begin().await?;

        let mut record = match tx.get_by_id(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                abort(&mut *tx).await;
                return Err(AuditError::RecordNotFound(id));
            }
            Err(e) => {
                abort(&mut *tx).await;
                return Err(e.into());
            }
        };

        let Some(apply_sequence) = record.apply_sequence.filter(|_| record.is_auditing()) else {
            abort(&mut *tx).await;
            return Err(AuditError::AuditCancelNotAllowed {
                id,
                state: record.audit_state,
            });
        };

        record.mark_cancelled(Utc::now(), submitter.id);
        if let Err(e) = tx.save(&record).await {
            abort(&mut *tx).await;
            return Err(e.into());
        }

        let correlation_id = CorrelationId::new(id, apply_sequence).encode();
        let result = self
            .bounded(self.engine.cancel(&correlation_id, reason))
            .await;

        if let Err(e) = result {
            warn!(correlation_id = %correlation_id, error = %e, "Audit cancel failed, keeping audit");
            abort(&mut *tx).await;
            return Err(AuditError::AuditCancelFailed(e));
        }

        tx.commit().await?;
        info!(correlation_id = %correlation_id, "Audit cancelled");
        Ok(record)
    }

    /// Soft-delete a record that is neither opened nor under audit.
    #[tracing::instrument(name = "audit.delete", skip_all, fields(record_id = id))]
    pub async fn delete(&self, id: u64, submitter: &Submitter) -> Result<()> {
        let mut tx = self.store.begin().await?;

        let record = match tx.get_by_id(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                abort(&mut *tx).await;
                return Err(AuditError::RecordNotFound(id));
            }
            Err(e) => {
                abort(&mut *tx).await;
                return Err(e.into());
            }
        };

        if record.is_opened() || record.is_auditing() {
            abort(&mut *tx).await;
            return Err(AuditError::ResourceDeleteNotAllowed(id));
        }

        match tx.delete(id, submitter.id, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => {
                abort(&mut *tx).await;
                return Err(AuditError::RecordNotFound(id));
            }
            Err(e) => {
                abort(&mut *tx).await;
                return Err(e.into());
            }
        }

        tx.commit().await?;
        info!(record_id = id, "Open-catalog record deleted");
        Ok(())
    }

    /// Submit several create requests. Each item succeeds or fails on its own.
    #[tracing::instrument(name = "audit.submit_batch", skip_all, fields(count = requests.len()))]
    pub async fn submit_batch(&self, requests: &[OpenRequest]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for request in requests {
            match self.submit_create(request).await {
                Ok(record) => outcome.succeeded.push(record),
                Err(error) => {
                    warn!(source_id = %request.source_id, error = %error, "Batch item failed");
                    outcome.failed.push(BatchFailure {
                        source_id: request.source_id.clone(),
                        error,
                    });
                }
            }
        }
        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "Batch submitted"
        );
        outcome
    }

    /// Look up the source and verify it may be published. Returns its title.
    async fn eligible_title(&self, source_id: &str) -> Result<String> {
        let source = self
            .sources
            .get_source(source_id)
            .await?
            .ok_or_else(|| AuditError::SourceNotFound(source_id.to_string()))?;
        check_eligible(&source).map_err(AuditError::NotEligible)?;
        Ok(source.title)
    }

    /// Hand the written record to the engine, then commit or roll back.
    async fn send_submission(
        &self,
        mut tx: Box<dyn StoreTransaction>,
        record_id: u64,
        apply_sequence: u64,
        process_key: &str,
        payload: &ApplyPayload,
    ) -> Result<()> {
        let correlation_id = CorrelationId::new(record_id, apply_sequence).encode();

        let result = self
            .bounded(self.engine.submit(&correlation_id, process_key, payload))
            .await;

        if let Err(e) = result {
            warn!(
                correlation_id = %correlation_id,
                process_key = %process_key,
                error = %e,
                "Audit submission failed, rolling back"
            );
            abort(&mut *tx).await;
            return Err(AuditError::AuditSubmissionFailed(e));
        }

        tx.commit().await?;
        info!(
            record_id,
            apply_sequence,
            correlation_id = %correlation_id,
            process_key = %process_key,
            "Submitted for audit"
        );
        Ok(())
    }

    async fn bounded<F>(&self, call: F) -> workflow::Result<()>
    where
        F: Future<Output = workflow::Result<()>>,
    {
        match tokio::time::timeout(self.engine_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(WorkflowError::Timeout(self.engine_timeout)),
        }
    }
}

fn ensure_resubmittable(record: &OpenCatalogRecord) -> Result<()> {
    if record.is_opened() || !record.audit_state.allows_resubmit() {
        return Err(AuditError::ResubmitNotAllowed {
            id: record.id,
            state: record.audit_state,
        });
    }
    Ok(())
}

fn map_create_error(error: StorageError, source_id: &str) -> AuditError {
    match error {
        StorageError::Conflict(_) => AuditError::DuplicateOpenRequest(source_id.to_string()),
        other => other.into(),
    }
}

/// Roll back, logging rather than surfacing a failed rollback.
async fn abort(tx: &mut dyn StoreTransaction) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}
