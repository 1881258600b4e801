//! Callback dispatcher.
//!
//! Translates workflow engine messages into state store updates. Delivery is
//! at-least-once and unordered, so every per-record update goes through
//! [`OpenCatalogStore::apply_by_correlation`]: it only lands while the record
//! still carries the submission's apply sequence and is still `Auditing`.
//! A delivery that does not match is skipped, which is not an error.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditError, Result};
use crate::bus::{BusError, FinalResult, IntermediateStep, MessageHandler, WorkflowMessage};
use crate::correlation::CorrelationId;
use crate::model::{AuditNode, MutationGuard, RecordMutation};
use crate::reconcile::ReconciliationSweep;
use crate::storage::OpenCatalogStore;

/// Terminal verdict carried by a final-result message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Reject,
    Undone,
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pass" => Ok(Self::Pass),
            "reject" => Ok(Self::Reject),
            "undone" => Ok(Self::Undone),
            _ => Err(s.to_string()),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("pass"),
            Self::Reject => f.write_str("reject"),
            Self::Undone => f.write_str("undone"),
        }
    }
}

/// What a delivered message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The record was updated.
    Applied,
    /// Stale or duplicate delivery; nothing changed.
    Skipped,
    /// The message carries nothing this consumer acts on.
    Ignored,
    /// Records moved out of `Auditing` by a retirement sweep.
    Swept(u64),
}

/// Handles the three workflow message kinds.
#[derive(Clone)]
pub struct CallbackDispatcher {
    store: Arc<dyn OpenCatalogStore>,
    sweep: ReconciliationSweep,
}

impl CallbackDispatcher {
    pub fn new(store: Arc<dyn OpenCatalogStore>) -> Self {
        let sweep = ReconciliationSweep::new(Arc::clone(&store));
        Self { store, sweep }
    }

    pub async fn dispatch(&self, message: &WorkflowMessage) -> Result<CallbackOutcome> {
        match message {
            WorkflowMessage::IntermediateStep(step) => self.on_intermediate_step(step).await,
            WorkflowMessage::FinalResult(result) => self.on_final_result(result).await,
            WorkflowMessage::ProcessRetired(retired) => {
                self.on_process_retired(&retired.process_keys).await
            }
        }
    }

    /// Record progress, or a rejection at an intermediate node.
    pub async fn on_intermediate_step(&self, step: &IntermediateStep) -> Result<CallbackOutcome> {
        let correlation = CorrelationId::decode(&step.correlation_id)?;
        let now = Utc::now();
        let next = step.next_activities.first();

        let (guard, mutation) = match (&step.current_activity, next) {
            (_, Some(next)) if step.current_activity.is_none() || step.verdict => (
                MutationGuard::while_auditing_and_not_at(&next.id),
                RecordMutation::advance(
                    AuditNode {
                        id: next.id.clone(),
                        name: next.name.clone(),
                    },
                    now,
                ),
            ),
            (Some(_), _) if !step.verdict => (
                MutationGuard::while_auditing(),
                RecordMutation::reject(step.advisory_comment.clone(), now),
            ),
            _ => {
                // Approval at the last node: the final result decides.
                debug!(correlation_id = %step.correlation_id, "Intermediate step carries no change");
                return Ok(CallbackOutcome::Ignored);
            }
        };

        self.apply(&step.correlation_id, correlation, &guard, &mutation)
            .await
    }

    pub async fn on_final_result(&self, result: &FinalResult) -> Result<CallbackOutcome> {
        let correlation = CorrelationId::decode(&result.correlation_id)?;

        let verdict = match result.verdict.parse::<Verdict>() {
            Ok(verdict) => verdict,
            Err(unknown) => {
                warn!(
                    correlation_id = %result.correlation_id,
                    verdict = %unknown,
                    "Unknown final verdict, ignoring"
                );
                return Ok(CallbackOutcome::Ignored);
            }
        };

        let now = Utc::now();
        let mutation = match verdict {
            Verdict::Pass => RecordMutation::pass(now),
            Verdict::Reject => RecordMutation::reject(None, now),
            Verdict::Undone => RecordMutation::undone(now),
        };

        self.apply(
            &result.correlation_id,
            correlation,
            &MutationGuard::while_auditing(),
            &mutation,
        )
        .await
    }

    pub async fn on_process_retired(&self, process_keys: &[String]) -> Result<CallbackOutcome> {
        let affected = self.sweep.run(process_keys).await?;
        Ok(CallbackOutcome::Swept(affected))
    }

    async fn apply(
        &self,
        token: &str,
        correlation: CorrelationId,
        guard: &MutationGuard,
        mutation: &RecordMutation,
    ) -> Result<CallbackOutcome> {
        let applied = self
            .store
            .apply_by_correlation(
                correlation.record_id,
                correlation.apply_sequence,
                guard,
                mutation,
            )
            .await?;

        if applied {
            info!(
                record_id = correlation.record_id,
                apply_sequence = correlation.apply_sequence,
                correlation_id = %token,
                audit_state = ?mutation.audit_state,
                "Applied workflow callback"
            );
            Ok(CallbackOutcome::Applied)
        } else {
            debug!(
                record_id = correlation.record_id,
                apply_sequence = correlation.apply_sequence,
                correlation_id = %token,
                "Stale or duplicate workflow callback"
            );
            Ok(CallbackOutcome::Skipped)
        }
    }
}

impl MessageHandler for CallbackDispatcher {
    fn handle(
        &self,
        message: Arc<WorkflowMessage>,
    ) -> BoxFuture<'static, std::result::Result<(), BusError>> {
        let dispatcher = self.clone();
        Box::pin(async move {
            match dispatcher.dispatch(&message).await {
                Ok(_) => Ok(()),
                // Redelivery cannot repair a bad token.
                Err(AuditError::MalformedCorrelationId(e)) => {
                    error!(kind = message.kind(), error = %e, "Dropping workflow message");
                    Ok(())
                }
                Err(e) => {
                    error!(
                        kind = message.kind(),
                        correlation_id = message.correlation_id().unwrap_or_default(),
                        error = %e,
                        "Workflow callback failed"
                    );
                    Err(BusError::HandlerFailed {
                        kind: message.kind().to_string(),
                        message: e.to_string(),
                    })
                }
            }
        })
    }
}
