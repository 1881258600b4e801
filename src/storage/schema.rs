//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Open-catalog records table schema.
#[derive(Iden)]
pub enum OpenCatalogs {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "source_id"]
    SourceId,
    #[iden = "apply_sequence"]
    ApplySequence,
    #[iden = "open_status"]
    OpenStatus,
    #[iden = "audit_state"]
    AuditState,
    #[iden = "audit_advice"]
    AuditAdvice,
    #[iden = "audit_node_id"]
    AuditNodeId,
    #[iden = "audit_node_name"]
    AuditNodeName,
    #[iden = "open_at"]
    OpenAt,
    #[iden = "process_definition_key"]
    ProcessDefinitionKey,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
    #[iden = "updater_id"]
    UpdaterId,
    #[iden = "deleted_at"]
    DeletedAt,
}

/// Source catalog table schema. Written by the catalog system; read here.
#[derive(Iden)]
pub enum Catalogs {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "title"]
    Title,
    #[iden = "online"]
    Online,
    #[iden = "open_policy"]
    OpenPolicy,
}

/// SQL for creating the open-catalog records table.
pub const CREATE_OPEN_CATALOGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS open_catalogs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL,
    apply_sequence INTEGER,
    open_status TEXT NOT NULL,
    audit_state TEXT NOT NULL,
    audit_advice TEXT,
    audit_node_id TEXT,
    audit_node_name TEXT,
    open_at TEXT,
    process_definition_key TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    updater_id INTEGER NOT NULL,
    deleted_at TEXT
)
"#;

/// At most one live record per source.
pub const CREATE_SOURCE_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_open_catalogs_source
    ON open_catalogs(source_id) WHERE deleted_at IS NULL
"#;

/// Serves the reconciliation sweep.
pub const CREATE_PROCESS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_open_catalogs_process
    ON open_catalogs(process_definition_key, audit_state)
"#;

/// SQL for creating the source catalog table.
pub const CREATE_CATALOGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS catalogs (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    online INTEGER NOT NULL DEFAULT 0,
    open_policy TEXT NOT NULL DEFAULT 'allowed'
)
"#;
