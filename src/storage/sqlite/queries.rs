//! Statement builders and row decoding shared by the store and its transactions.

use chrono::{DateTime, Utc};
use sea_query::{Cond, Expr, Func, Query, SimpleExpr, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::model::{
    AuditNode, AuditState, MutationGuard, NewRecord, OpenCatalogRecord, RecordMutation,
};
use crate::storage::schema::OpenCatalogs;
use crate::storage::{Result, StorageError};

const RECORD_COLUMNS: [OpenCatalogs; 14] = [
    OpenCatalogs::Id,
    OpenCatalogs::SourceId,
    OpenCatalogs::ApplySequence,
    OpenCatalogs::OpenStatus,
    OpenCatalogs::AuditState,
    OpenCatalogs::AuditAdvice,
    OpenCatalogs::AuditNodeId,
    OpenCatalogs::AuditNodeName,
    OpenCatalogs::OpenAt,
    OpenCatalogs::ProcessDefinitionKey,
    OpenCatalogs::CreatedAt,
    OpenCatalogs::UpdatedAt,
    OpenCatalogs::UpdaterId,
    OpenCatalogs::DeletedAt,
];

pub(super) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("{column}: {e}")))
}

fn to_db_id(value: u64) -> i64 {
    value as i64
}

pub(super) fn select_by_id(id: u64) -> String {
    Query::select()
        .columns(RECORD_COLUMNS)
        .from(OpenCatalogs::Table)
        .and_where(Expr::col(OpenCatalogs::Id).eq(to_db_id(id)))
        .and_where(Expr::col(OpenCatalogs::DeletedAt).is_null())
        .to_string(SqliteQueryBuilder)
}

pub(super) fn select_by_source(source_id: &str) -> String {
    Query::select()
        .columns(RECORD_COLUMNS)
        .from(OpenCatalogs::Table)
        .and_where(Expr::col(OpenCatalogs::SourceId).eq(source_id))
        .and_where(Expr::col(OpenCatalogs::DeletedAt).is_null())
        .to_string(SqliteQueryBuilder)
}

pub(super) fn insert(record: &NewRecord) -> String {
    let created_at = timestamp(record.created_at);
    Query::insert()
        .into_table(OpenCatalogs::Table)
        .columns([
            OpenCatalogs::SourceId,
            OpenCatalogs::ApplySequence,
            OpenCatalogs::OpenStatus,
            OpenCatalogs::AuditState,
            OpenCatalogs::OpenAt,
            OpenCatalogs::ProcessDefinitionKey,
            OpenCatalogs::CreatedAt,
            OpenCatalogs::UpdatedAt,
            OpenCatalogs::UpdaterId,
        ])
        .values_panic([
            record.source_id.as_str().into(),
            record.apply_sequence.map(to_db_id).into(),
            record.open_status.as_str().into(),
            record.audit_state.as_str().into(),
            record.open_at.map(timestamp).into(),
            record.process_definition_key.clone().into(),
            created_at.clone().into(),
            created_at.into(),
            to_db_id(record.updater_id).into(),
        ])
        .to_string(SqliteQueryBuilder)
}

pub(super) fn update_full(record: &OpenCatalogRecord) -> String {
    let (node_id, node_name) = match &record.audit_node {
        Some(node) => (Some(node.id.clone()), Some(node.name.clone())),
        None => (None, None),
    };

    Query::update()
        .table(OpenCatalogs::Table)
        .values([
            (
                OpenCatalogs::ApplySequence,
                record.apply_sequence.map(to_db_id).into(),
            ),
            (OpenCatalogs::OpenStatus, record.open_status.as_str().into()),
            (OpenCatalogs::AuditState, record.audit_state.as_str().into()),
            (OpenCatalogs::AuditAdvice, record.audit_advice.clone().into()),
            (OpenCatalogs::AuditNodeId, node_id.into()),
            (OpenCatalogs::AuditNodeName, node_name.into()),
            (OpenCatalogs::OpenAt, record.open_at.map(timestamp).into()),
            (
                OpenCatalogs::ProcessDefinitionKey,
                record.process_definition_key.clone().into(),
            ),
            (OpenCatalogs::UpdatedAt, timestamp(record.updated_at).into()),
            (OpenCatalogs::UpdaterId, to_db_id(record.updater_id).into()),
        ])
        .and_where(Expr::col(OpenCatalogs::Id).eq(to_db_id(record.id)))
        .and_where(Expr::col(OpenCatalogs::DeletedAt).is_null())
        .to_string(SqliteQueryBuilder)
}

pub(super) fn soft_delete(id: u64, updater_id: u64, now: DateTime<Utc>) -> String {
    let now = timestamp(now);
    Query::update()
        .table(OpenCatalogs::Table)
        .values([
            (OpenCatalogs::DeletedAt, now.clone().into()),
            (OpenCatalogs::UpdatedAt, now.into()),
            (OpenCatalogs::UpdaterId, to_db_id(updater_id).into()),
        ])
        .and_where(Expr::col(OpenCatalogs::Id).eq(to_db_id(id)))
        .and_where(Expr::col(OpenCatalogs::DeletedAt).is_null())
        .to_string(SqliteQueryBuilder)
}

/// SET clause for a partial mutation. `open_at` only fills an empty column.
fn mutation_values(mutation: &RecordMutation) -> Vec<(OpenCatalogs, SimpleExpr)> {
    let mut values: Vec<(OpenCatalogs, SimpleExpr)> = vec![(
        OpenCatalogs::UpdatedAt,
        timestamp(mutation.updated_at).into(),
    )];

    if let Some(state) = mutation.audit_state {
        values.push((OpenCatalogs::AuditState, state.as_str().into()));
    }
    if let Some(status) = mutation.open_status {
        values.push((OpenCatalogs::OpenStatus, status.as_str().into()));
    }
    if let Some(advice) = &mutation.audit_advice {
        values.push((OpenCatalogs::AuditAdvice, advice.as_str().into()));
    }
    if let Some(node) = &mutation.audit_node {
        values.push((OpenCatalogs::AuditNodeId, node.id.as_str().into()));
        values.push((OpenCatalogs::AuditNodeName, node.name.as_str().into()));
    }
    if let Some(open_at) = mutation.open_at {
        values.push((
            OpenCatalogs::OpenAt,
            Func::coalesce([
                Expr::col(OpenCatalogs::OpenAt).into(),
                Expr::val(timestamp(open_at)).into(),
            ])
            .into(),
        ));
    }

    values
}

pub(super) fn apply_by_correlation(
    id: u64,
    apply_sequence: u64,
    guard: &MutationGuard,
    mutation: &RecordMutation,
) -> String {
    let mut matches = Cond::all()
        .add(Expr::col(OpenCatalogs::Id).eq(to_db_id(id)))
        .add(Expr::col(OpenCatalogs::ApplySequence).eq(to_db_id(apply_sequence)))
        .add(Expr::col(OpenCatalogs::DeletedAt).is_null())
        .add(Expr::col(OpenCatalogs::AuditState).eq(guard.expected_state.as_str()));

    if let Some(node_id) = &guard.node_differs_from {
        matches = matches.add(
            Cond::any()
                .add(Expr::col(OpenCatalogs::AuditNodeId).is_null())
                .add(Expr::col(OpenCatalogs::AuditNodeId).ne(node_id.as_str())),
        );
    }

    let mut query = Query::update();
    query
        .table(OpenCatalogs::Table)
        .values(mutation_values(mutation))
        .cond_where(matches);

    query.to_string(SqliteQueryBuilder)
}

pub(super) fn bulk_transition(
    process_keys: &[String],
    from: AuditState,
    mutation: &RecordMutation,
) -> String {
    Query::update()
        .table(OpenCatalogs::Table)
        .values(mutation_values(mutation))
        .and_where(
            Expr::col(OpenCatalogs::ProcessDefinitionKey)
                .is_in(process_keys.iter().map(String::as_str)),
        )
        .and_where(Expr::col(OpenCatalogs::AuditState).eq(from.as_str()))
        .and_where(Expr::col(OpenCatalogs::DeletedAt).is_null())
        .to_string(SqliteQueryBuilder)
}

pub(super) fn record_from_row(row: &SqliteRow) -> Result<OpenCatalogRecord> {
    let open_status: String = row.try_get("open_status")?;
    let audit_state: String = row.try_get("audit_state")?;
    let node_id: Option<String> = row.try_get("audit_node_id")?;
    let node_name: Option<String> = row.try_get("audit_node_name")?;
    let open_at: Option<String> = row.try_get("open_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let apply_sequence: Option<i64> = row.try_get("apply_sequence")?;
    let id: i64 = row.try_get("id")?;
    let updater_id: i64 = row.try_get("updater_id")?;

    Ok(OpenCatalogRecord {
        id: id as u64,
        source_id: row.try_get("source_id")?,
        apply_sequence: apply_sequence.map(|s| s as u64),
        open_status: open_status
            .parse()
            .map_err(|e| StorageError::Corrupt(format!("{e}")))?,
        audit_state: audit_state
            .parse()
            .map_err(|e| StorageError::Corrupt(format!("{e}")))?,
        audit_advice: row.try_get("audit_advice")?,
        audit_node: node_id.map(|id| AuditNode {
            id,
            name: node_name.unwrap_or_default(),
        }),
        open_at: open_at
            .map(|raw| parse_timestamp("open_at", &raw))
            .transpose()?,
        process_definition_key: row.try_get("process_definition_key")?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        updater_id: updater_id as u64,
    })
}

/// Map a unique-index violation on insert to [`StorageError::Conflict`].
pub(super) fn map_insert_error(error: sqlx::Error, source_id: &str) -> StorageError {
    if let sqlx::Error::Database(db) = &error {
        if db.is_unique_violation() {
            return StorageError::Conflict(format!(
                "open-catalog record already exists for source {source_id}"
            ));
        }
    }
    StorageError::Database(error)
}
