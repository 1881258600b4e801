//! In-memory storage for tests and local runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::{AuditState, MutationGuard, NewRecord, OpenCatalogRecord, RecordMutation};
use crate::storage::{OpenCatalogStore, Result, StorageError, StoreTransaction};

#[derive(Debug, Clone)]
struct StoredRecord {
    record: OpenCatalogRecord,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    next_id: u64,
    records: BTreeMap<u64, StoredRecord>,
}

impl Tables {
    fn live(&self, id: u64) -> Option<&OpenCatalogRecord> {
        self.records
            .get(&id)
            .filter(|s| s.deleted_at.is_none())
            .map(|s| &s.record)
    }

    fn live_by_source(&self, source_id: &str) -> Option<&OpenCatalogRecord> {
        self.records
            .values()
            .find(|s| s.deleted_at.is_none() && s.record.source_id == source_id)
            .map(|s| &s.record)
    }

    fn insert(&mut self, record: NewRecord) -> Result<OpenCatalogRecord> {
        if self.live_by_source(&record.source_id).is_some() {
            return Err(StorageError::Conflict(format!(
                "open-catalog record already exists for source {}",
                record.source_id
            )));
        }
        self.next_id += 1;
        let created = record.into_record(self.next_id);
        self.records.insert(
            created.id,
            StoredRecord {
                record: created.clone(),
                deleted_at: None,
            },
        );
        Ok(created)
    }

    fn update(&mut self, record: &OpenCatalogRecord) -> Result<()> {
        match self.records.get_mut(&record.id) {
            Some(stored) if stored.deleted_at.is_none() => {
                let created_at = stored.record.created_at;
                stored.record = record.clone();
                stored.record.created_at = created_at;
                Ok(())
            }
            _ => Err(StorageError::NotFound(record.id)),
        }
    }

    fn soft_delete(&mut self, id: u64, updater_id: u64, now: DateTime<Utc>) -> bool {
        match self.records.get_mut(&id) {
            Some(stored) if stored.deleted_at.is_none() => {
                stored.deleted_at = Some(now);
                stored.record.updated_at = now;
                stored.record.updater_id = updater_id;
                true
            }
            _ => false,
        }
    }
}

/// In-memory open-catalog store.
///
/// A transaction holds the table lock for its whole lifetime and works on a
/// copy, which replaces the tables on commit.
///
/// The lock is store-wide. While a submission keeps its transaction open
/// across the workflow engine call, every other read, callback and sweep
/// waits for it, up to the engine timeout. Use the SQLite store where
/// callbacks must proceed during submissions.
#[derive(Default, Clone)]
pub struct InMemoryOpenCatalogStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryOpenCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    pub async fn len(&self) -> usize {
        self.tables
            .lock()
            .await
            .records
            .values()
            .filter(|s| s.deleted_at.is_none())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl OpenCatalogStore for InMemoryOpenCatalogStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            guard: Some(guard),
            working,
        }))
    }

    async fn get_by_id(&self, id: u64) -> Result<Option<OpenCatalogRecord>> {
        Ok(self.tables.lock().await.live(id).cloned())
    }

    async fn get_by_source_id(&self, source_id: &str) -> Result<Option<OpenCatalogRecord>> {
        Ok(self.tables.lock().await.live_by_source(source_id).cloned())
    }

    async fn apply_by_correlation(
        &self,
        id: u64,
        apply_sequence: u64,
        guard: &MutationGuard,
        mutation: &RecordMutation,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let Some(stored) = tables.records.get_mut(&id) else {
            return Ok(false);
        };
        if stored.deleted_at.is_some()
            || stored.record.apply_sequence != Some(apply_sequence)
            || !guard.matches(&stored.record)
        {
            return Ok(false);
        }
        mutation.apply_to(&mut stored.record);
        Ok(true)
    }

    async fn bulk_transition(
        &self,
        process_keys: &[String],
        from: AuditState,
        mutation: &RecordMutation,
    ) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut affected = 0;
        for stored in tables.records.values_mut() {
            let bound = stored
                .record
                .process_definition_key
                .as_ref()
                .is_some_and(|key| process_keys.contains(key));
            if stored.deleted_at.is_none() && bound && stored.record.audit_state == from {
                mutation.apply_to(&mut stored.record);
                affected += 1;
            }
        }
        Ok(affected)
    }
}

/// Transaction over [`InMemoryOpenCatalogStore`].
pub struct InMemoryTransaction {
    guard: Option<OwnedMutexGuard<Tables>>,
    working: Tables,
}

impl InMemoryTransaction {
    fn ensure_open(&self) -> Result<()> {
        if self.guard.is_none() {
            return Err(StorageError::TransactionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn get_by_id(&mut self, id: u64) -> Result<Option<OpenCatalogRecord>> {
        self.ensure_open()?;
        Ok(self.working.live(id).cloned())
    }

    async fn get_by_source_id(&mut self, source_id: &str) -> Result<Option<OpenCatalogRecord>> {
        self.ensure_open()?;
        Ok(self.working.live_by_source(source_id).cloned())
    }

    async fn create(&mut self, record: NewRecord) -> Result<OpenCatalogRecord> {
        self.ensure_open()?;
        self.working.insert(record)
    }

    async fn save(&mut self, record: &OpenCatalogRecord) -> Result<()> {
        self.ensure_open()?;
        self.working.update(record)
    }

    async fn delete(&mut self, id: u64, updater_id: u64, now: DateTime<Utc>) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.working.soft_delete(id, updater_id, now))
    }

    async fn commit(&mut self) -> Result<()> {
        let mut guard = self.guard.take().ok_or(StorageError::TransactionClosed)?;
        *guard = std::mem::take(&mut self.working);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.guard.take().ok_or(StorageError::TransactionClosed)?;
        Ok(())
    }
}
