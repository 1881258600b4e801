//! SQLite OpenCatalogStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqlitePool};
use tracing::{debug, warn};

use super::queries;
use crate::model::{AuditState, MutationGuard, NewRecord, OpenCatalogRecord, RecordMutation};
use crate::storage::schema::{CREATE_OPEN_CATALOGS_TABLE, CREATE_PROCESS_INDEX, CREATE_SOURCE_INDEX};
use crate::storage::{OpenCatalogStore, Result, StorageError, StoreTransaction};

/// SQLite implementation of OpenCatalogStore.
pub struct SqliteOpenCatalogStore {
    pool: SqlitePool,
}

impl SqliteOpenCatalogStore {
    /// Create a new SQLite open-catalog store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the table and its indexes.
    pub async fn init(&self) -> Result<()> {
        for ddl in [
            CREATE_OPEN_CATALOGS_TABLE,
            CREATE_SOURCE_INDEX,
            CREATE_PROCESS_INDEX,
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl OpenCatalogStore for SqliteOpenCatalogStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = SqliteStoreTransaction::begin(&self.pool).await?;
        Ok(Box::new(tx))
    }

    async fn get_by_id(&self, id: u64) -> Result<Option<OpenCatalogRecord>> {
        let row = sqlx::query(&queries::select_by_id(id))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(queries::record_from_row).transpose()
    }

    async fn get_by_source_id(&self, source_id: &str) -> Result<Option<OpenCatalogRecord>> {
        let row = sqlx::query(&queries::select_by_source(source_id))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(queries::record_from_row).transpose()
    }

    async fn apply_by_correlation(
        &self,
        id: u64,
        apply_sequence: u64,
        guard: &MutationGuard,
        mutation: &RecordMutation,
    ) -> Result<bool> {
        let query = queries::apply_by_correlation(id, apply_sequence, guard, mutation);
        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn bulk_transition(
        &self,
        process_keys: &[String],
        from: AuditState,
        mutation: &RecordMutation,
    ) -> Result<u64> {
        if process_keys.is_empty() {
            return Ok(0);
        }
        let query = queries::bulk_transition(process_keys, from, mutation);
        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

/// Transaction over a dedicated pooled connection.
///
/// `BEGIN IMMEDIATE` acquires the write lock upfront, preventing deadlocks
/// when concurrent DEFERRED transactions race to upgrade from shared to
/// exclusive. If the transaction is dropped unfinished, the connection is
/// closed rather than handed back to the pool with the transaction open.
pub struct SqliteStoreTransaction {
    conn: Option<PoolConnection<Sqlite>>,
}

impl SqliteStoreTransaction {
    async fn begin(pool: &SqlitePool) -> Result<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut PoolConnection<Sqlite>> {
        self.conn.as_mut().ok_or(StorageError::TransactionClosed)
    }

    async fn finish(&mut self, statement: &str) -> Result<()> {
        let mut conn = self.conn.take().ok_or(StorageError::TransactionClosed)?;
        if let Err(e) = sqlx::query(statement).execute(&mut *conn).await {
            conn.close_on_drop();
            return Err(e.into());
        }
        Ok(())
    }
}

impl Drop for SqliteStoreTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            warn!("Transaction dropped without commit or rollback, discarding connection");
            conn.close_on_drop();
        }
    }
}

#[async_trait]
impl StoreTransaction for SqliteStoreTransaction {
    async fn get_by_id(&mut self, id: u64) -> Result<Option<OpenCatalogRecord>> {
        let conn = self.conn()?;
        let row = sqlx::query(&queries::select_by_id(id))
            .fetch_optional(&mut **conn)
            .await?;
        row.as_ref().map(queries::record_from_row).transpose()
    }

    async fn get_by_source_id(&mut self, source_id: &str) -> Result<Option<OpenCatalogRecord>> {
        let conn = self.conn()?;
        let row = sqlx::query(&queries::select_by_source(source_id))
            .fetch_optional(&mut **conn)
            .await?;
        row.as_ref().map(queries::record_from_row).transpose()
    }

    async fn create(&mut self, record: NewRecord) -> Result<OpenCatalogRecord> {
        let conn = self.conn()?;
        let result = sqlx::query(&queries::insert(&record))
            .execute(&mut **conn)
            .await
            .map_err(|e| queries::map_insert_error(e, &record.source_id))?;

        let id = result.last_insert_rowid() as u64;
        debug!(record_id = id, source_id = %record.source_id, "Inserted open-catalog record");
        Ok(record.into_record(id))
    }

    async fn save(&mut self, record: &OpenCatalogRecord) -> Result<()> {
        let conn = self.conn()?;
        let result = sqlx::query(&queries::update_full(record))
            .execute(&mut **conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(record.id));
        }
        Ok(())
    }

    async fn delete(&mut self, id: u64, updater_id: u64, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let result = sqlx::query(&queries::soft_delete(id, updater_id, now))
            .execute(&mut **conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(&mut self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}
