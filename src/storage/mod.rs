//! Open-catalog state store.
//!
//! The store owns the persisted [`OpenCatalogRecord`] rows. Two write paths
//! meet here:
//!
//! - user actions run inside a [`StoreTransaction`] so the coordinator can
//!   defer the commit until the workflow engine has accepted the submission;
//! - callbacks use [`OpenCatalogStore::apply_by_correlation`], a single
//!   compare-and-swap on `apply_sequence`, and the reconciliation sweep uses
//!   [`OpenCatalogStore::bulk_transition`], a single set-based update.
//!
//! No in-process locks coordinate the two paths; the row is the unit of
//! mutual exclusion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::eligibility::{InMemorySourceCatalog, SourceCatalog};
use crate::model::{AuditState, MutationGuard, NewRecord, OpenCatalogRecord, RecordMutation};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryOpenCatalogStore;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteOpenCatalogStore, SqliteSourceCatalog};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Record not found: id={0}")]
    NotFound(u64),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transaction already finished")]
    TransactionClosed,

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Unknown storage type: {0}")]
    UnknownType(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A unit of work over the store.
///
/// Nothing written through a transaction is visible to other writers until
/// [`commit`](Self::commit). Dropping a transaction without finishing it
/// discards its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn get_by_id(&mut self, id: u64) -> Result<Option<OpenCatalogRecord>>;

    /// Non-deleted record for a source, if any.
    async fn get_by_source_id(&mut self, source_id: &str) -> Result<Option<OpenCatalogRecord>>;

    /// Insert a record and assign its ID.
    ///
    /// Fails with [`StorageError::Conflict`] if a non-deleted record already
    /// exists for the same source.
    async fn create(&mut self, record: NewRecord) -> Result<OpenCatalogRecord>;

    /// Overwrite every mutable field of an existing, non-deleted record.
    async fn save(&mut self, record: &OpenCatalogRecord) -> Result<()>;

    /// Soft-delete. Returns `false` if the record was missing or already deleted.
    async fn delete(&mut self, id: u64, updater_id: u64, now: DateTime<Utc>) -> Result<bool>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Persistence contract for open-catalog records.
///
/// # Implementations
///
/// - `SqliteOpenCatalogStore`: SQLite storage
/// - `InMemoryOpenCatalogStore`: in-memory storage for tests and local runs
#[async_trait]
pub trait OpenCatalogStore: Send + Sync {
    /// Start a transaction. Holds the write lock until it is finished.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    async fn get_by_id(&self, id: u64) -> Result<Option<OpenCatalogRecord>>;

    async fn get_by_source_id(&self, source_id: &str) -> Result<Option<OpenCatalogRecord>>;

    /// Apply a callback mutation only if the stored `apply_sequence` still
    /// equals `apply_sequence` and `guard` holds.
    ///
    /// Returns `false` for stale or duplicate deliveries; that is not an error.
    async fn apply_by_correlation(
        &self,
        id: u64,
        apply_sequence: u64,
        guard: &MutationGuard,
        mutation: &RecordMutation,
    ) -> Result<bool>;

    /// Apply `mutation` to every non-deleted record bound to one of
    /// `process_keys` whose state is `from`. Returns the number of rows changed.
    async fn bulk_transition(
        &self,
        process_keys: &[String],
        from: AuditState,
        mutation: &RecordMutation,
    ) -> Result<u64>;

    /// Insert in its own transaction.
    async fn create(&self, record: NewRecord) -> Result<OpenCatalogRecord> {
        let mut tx = self.begin().await?;
        match tx.create(record).await {
            Ok(created) => {
                tx.commit().await?;
                Ok(created)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Full-record update in its own transaction.
    async fn save(&self, record: &OpenCatalogRecord) -> Result<()> {
        let mut tx = self.begin().await?;
        match tx.save(record).await {
            Ok(()) => tx.commit().await,
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Soft-delete in its own transaction.
    async fn delete(&self, id: u64, updater_id: u64) -> Result<bool> {
        let mut tx = self.begin().await?;
        match tx.delete(id, updater_id, Utc::now()).await {
            Ok(deleted) => {
                tx.commit().await?;
                Ok(deleted)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }
}

/// Storage type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Sqlite,
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// Path to the SQLite database file.
    pub path: String,
    /// How long a connection waits on a held write lock, in seconds.
    ///
    /// Must exceed the workflow engine timeout: a submission keeps its write
    /// transaction open across the engine call.
    pub busy_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Sqlite,
            path: "./data/opencatalog.db".to_string(),
            busy_timeout_secs: 30,
        }
    }
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

/// Initialize storage based on configuration.
///
/// Returns the record store and the source catalog living alongside it.
pub async fn init_storage(
    config: &StorageConfig,
) -> Result<(Arc<dyn OpenCatalogStore>, Arc<dyn SourceCatalog>)> {
    match config.storage_type {
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

            info!(
                path = %config.path,
                busy_timeout_secs = config.busy_timeout_secs,
                "Storage: sqlite"
            );

            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)?;
            }

            let options = SqliteConnectOptions::new()
                .filename(&config.path)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(config.busy_timeout())
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?;

            let store = SqliteOpenCatalogStore::new(pool.clone());
            store.init().await?;

            let sources = SqliteSourceCatalog::new(pool);
            sources.init().await?;

            Ok((Arc::new(store), Arc::new(sources)))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err(StorageError::UnknownType("sqlite".to_string()))
        }
        StorageType::Memory => {
            info!("Storage: memory");
            Ok((
                Arc::new(InMemoryOpenCatalogStore::new()),
                Arc::new(InMemorySourceCatalog::new()),
            ))
        }
    }
}
