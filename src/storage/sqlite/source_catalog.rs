//! SQLite SourceCatalog implementation.

use async_trait::async_trait;
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};

use crate::eligibility::SourceCatalog;
use crate::model::{OpenPolicy, SourceRecord};
use crate::storage::schema::{Catalogs, CREATE_CATALOGS_TABLE};
use crate::storage::{Result, StorageError};

/// Reads source catalog entries from the `catalogs` table.
pub struct SqliteSourceCatalog {
    pool: SqlitePool,
}

impl SqliteSourceCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the table if the catalog system has not done so yet.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_CATALOGS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert or replace a source entry.
    pub async fn upsert(&self, source: &SourceRecord) -> Result<()> {
        let policy = match source.open_policy {
            OpenPolicy::Allowed => "allowed",
            OpenPolicy::Conditional => "conditional",
            OpenPolicy::Forbidden => "forbidden",
        };

        let query = Query::insert()
            .into_table(Catalogs::Table)
            .columns([
                Catalogs::Id,
                Catalogs::Title,
                Catalogs::Online,
                Catalogs::OpenPolicy,
            ])
            .values_panic([
                source.id.as_str().into(),
                source.title.as_str().into(),
                source.online.into(),
                policy.into(),
            ])
            .on_conflict(
                OnConflict::column(Catalogs::Id)
                    .update_columns([Catalogs::Title, Catalogs::Online, Catalogs::OpenPolicy])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SourceCatalog for SqliteSourceCatalog {
    async fn get_source(&self, source_id: &str) -> Result<Option<SourceRecord>> {
        let query = Query::select()
            .columns([
                Catalogs::Id,
                Catalogs::Title,
                Catalogs::Online,
                Catalogs::OpenPolicy,
            ])
            .from(Catalogs::Table)
            .and_where(Expr::col(Catalogs::Id).eq(source_id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;

        match row {
            Some(row) => {
                let policy: String = row.try_get("open_policy")?;
                Ok(Some(SourceRecord {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    online: row.try_get("online")?,
                    open_policy: policy
                        .parse()
                        .map_err(|e| StorageError::Corrupt(format!("{e}")))?,
                }))
            }
            None => Ok(None),
        }
    }
}
