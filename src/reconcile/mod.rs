//! Reconciliation sweep for retired process definitions.
//!
//! Once a process definition is deleted from the engine, records still
//! auditing under it can never receive another callback. The sweep moves
//! them to `Undone` in one set-based update. Re-running it only touches rows
//! that are still `Auditing`, so a partial failure is repaired by running it
//! again.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::model::{AuditState, RecordMutation};
use crate::storage::{OpenCatalogStore, Result};

#[derive(Clone)]
pub struct ReconciliationSweep {
    store: Arc<dyn OpenCatalogStore>,
}

impl ReconciliationSweep {
    pub fn new(store: Arc<dyn OpenCatalogStore>) -> Self {
        Self { store }
    }

    /// Returns the number of records moved out of `Auditing`.
    #[tracing::instrument(name = "reconcile.sweep", skip_all, fields(process_keys = ?process_keys))]
    pub async fn run(&self, process_keys: &[String]) -> Result<u64> {
        if process_keys.is_empty() {
            return Ok(0);
        }

        let affected = self
            .store
            .bulk_transition(
                process_keys,
                AuditState::Auditing,
                &RecordMutation::undone(Utc::now()),
            )
            .await?;

        info!(affected, "Swept audits of retired process definitions");
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewRecord, OpenStatus};
    use crate::storage::InMemoryOpenCatalogStore;

    async fn seed(store: &InMemoryOpenCatalogStore, source: &str, key: &str) -> u64 {
        store
            .create(NewRecord::auditing(source, 1, key, Utc::now(), 1))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_sweep_moves_bound_audits_to_undone() {
        let store = InMemoryOpenCatalogStore::new();
        let a = seed(&store, "S1", "P1").await;
        let b = seed(&store, "S2", "P2").await;
        let other = seed(&store, "S3", "P3").await;
        let sweep = ReconciliationSweep::new(Arc::new(store.clone()));

        let keys = vec!["P1".to_string(), "P2".to_string()];
        assert_eq!(sweep.run(&keys).await.unwrap(), 2);

        for id in [a, b] {
            let record = store.get_by_id(id).await.unwrap().unwrap();
            assert_eq!(record.audit_state, AuditState::Undone);
            assert_eq!(record.open_status, OpenStatus::NotOpen);
        }
        let untouched = store.get_by_id(other).await.unwrap().unwrap();
        assert_eq!(untouched.audit_state, AuditState::Auditing);

        assert_eq!(sweep.run(&keys).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_key_set_is_noop() {
        let store = InMemoryOpenCatalogStore::new();
        seed(&store, "S1", "P1").await;
        let sweep = ReconciliationSweep::new(Arc::new(store));
        assert_eq!(sweep.run(&[]).await.unwrap(), 0);
    }
}
