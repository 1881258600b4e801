//! Open-catalog record and the audit state model.
//!
//! An [`OpenCatalogRecord`] tracks whether a source catalog entry is publicly
//! published. Its visibility (`open_status`) and approval progress
//! (`audit_state`) move together:
//!
//! ```text
//!                 submit (no process bound)
//!   Unaudited ─────────────────────────────────────────▶ Pass / Opened
//!   Reject    │
//!   Undone    │ submit (process bound)          final result: pass
//!             └──────────────▶ Auditing ──────────────────▶ Pass / Opened
//!                               │  │  │
//!                        cancel │  │  └── final result: reject ──▶ Reject
//!                               ▼  └───── undone / sweep ───────▶ Undone
//!                           Unaudited
//! ```
//!
//! `Opened` implies `Pass` and a set `open_at`; nothing moves a record out of
//! `Opened`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit type under which open-catalog requests are bound to a process.
pub const OPEN_CATALOG_AUDIT_TYPE: &str = "open_catalog";

/// Externally visible publication flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenStatus {
    #[default]
    NotOpen,
    Opened,
}

/// Progress of a record through the approval pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditState {
    #[default]
    Unaudited,
    Auditing,
    Pass,
    Reject,
    Undone,
}

impl OpenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotOpen => "not_open",
            Self::Opened => "opened",
        }
    }
}

impl AuditState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unaudited => "unaudited",
            Self::Auditing => "auditing",
            Self::Pass => "pass",
            Self::Reject => "reject",
            Self::Undone => "undone",
        }
    }

    /// States from which a record may enter the pipeline again.
    pub fn allows_resubmit(&self) -> bool {
        matches!(self, Self::Unaudited | Self::Reject | Self::Undone)
    }
}

/// Error returned when a stored status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for OpenStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_open" => Ok(Self::NotOpen),
            "opened" => Ok(Self::Opened),
            other => Err(UnknownStatus {
                kind: "open_status",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for AuditState {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unaudited" => Ok(Self::Unaudited),
            "auditing" => Ok(Self::Auditing),
            "pass" => Ok(Self::Pass),
            "reject" => Ok(Self::Reject),
            "undone" => Ok(Self::Undone),
            other => Err(UnknownStatus {
                kind: "audit_state",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for OpenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for AuditState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activity node of the external process the audit currently sits at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditNode {
    pub id: String,
    pub name: String,
}

/// The unit of audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenCatalogRecord {
    pub id: u64,
    pub source_id: String,
    /// Regenerated on every submission; `None` until the record first enters
    /// an external audit.
    pub apply_sequence: Option<u64>,
    pub open_status: OpenStatus,
    pub audit_state: AuditState,
    pub audit_advice: Option<String>,
    pub audit_node: Option<AuditNode>,
    pub open_at: Option<DateTime<Utc>>,
    pub process_definition_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updater_id: u64,
}

impl OpenCatalogRecord {
    pub fn is_opened(&self) -> bool {
        self.open_status == OpenStatus::Opened
    }

    pub fn is_auditing(&self) -> bool {
        self.audit_state == AuditState::Auditing
    }

    /// `Opened` iff `Pass` with `open_at` set.
    pub fn is_consistent(&self) -> bool {
        let opened = self.open_status == OpenStatus::Opened;
        let passed = self.audit_state == AuditState::Pass && self.open_at.is_some();
        let auditing_bound = !self.is_auditing()
            || (self.apply_sequence.is_some() && self.process_definition_key.is_some());
        opened == passed && auditing_bound
    }

    /// Approve without an external audit.
    pub fn mark_opened(&mut self, now: DateTime<Utc>, updater_id: u64) {
        self.audit_state = AuditState::Pass;
        self.open_status = OpenStatus::Opened;
        self.audit_advice = None;
        self.audit_node = None;
        self.open_at.get_or_insert(now);
        self.touch(now, updater_id);
    }

    /// Enter the external audit pipeline under a fresh sequence.
    pub fn mark_auditing(
        &mut self,
        apply_sequence: u64,
        process_key: &str,
        now: DateTime<Utc>,
        updater_id: u64,
    ) {
        self.apply_sequence = Some(apply_sequence);
        self.audit_state = AuditState::Auditing;
        self.open_status = OpenStatus::NotOpen;
        self.process_definition_key = Some(process_key.to_string());
        self.audit_advice = None;
        self.audit_node = None;
        self.touch(now, updater_id);
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>, updater_id: u64) {
        self.audit_state = AuditState::Unaudited;
        self.open_status = OpenStatus::NotOpen;
        self.audit_node = None;
        self.touch(now, updater_id);
    }

    fn touch(&mut self, now: DateTime<Utc>, updater_id: u64) {
        self.updated_at = now;
        self.updater_id = updater_id;
    }
}

/// Fields for inserting a record; the store assigns `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub source_id: String,
    pub apply_sequence: Option<u64>,
    pub open_status: OpenStatus,
    pub audit_state: AuditState,
    pub open_at: Option<DateTime<Utc>>,
    pub process_definition_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updater_id: u64,
}

impl NewRecord {
    /// A record approved on creation because no audit process is bound.
    pub fn opened(source_id: impl Into<String>, now: DateTime<Utc>, updater_id: u64) -> Self {
        Self {
            source_id: source_id.into(),
            apply_sequence: None,
            open_status: OpenStatus::Opened,
            audit_state: AuditState::Pass,
            open_at: Some(now),
            process_definition_key: None,
            created_at: now,
            updater_id,
        }
    }

    /// A record submitted to the external engine under `process_key`.
    pub fn auditing(
        source_id: impl Into<String>,
        apply_sequence: u64,
        process_key: impl Into<String>,
        now: DateTime<Utc>,
        updater_id: u64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            apply_sequence: Some(apply_sequence),
            open_status: OpenStatus::NotOpen,
            audit_state: AuditState::Auditing,
            open_at: None,
            process_definition_key: Some(process_key.into()),
            created_at: now,
            updater_id,
        }
    }

    pub fn into_record(self, id: u64) -> OpenCatalogRecord {
        OpenCatalogRecord {
            id,
            source_id: self.source_id,
            apply_sequence: self.apply_sequence,
            open_status: self.open_status,
            audit_state: self.audit_state,
            audit_advice: None,
            audit_node: None,
            open_at: self.open_at,
            process_definition_key: self.process_definition_key,
            created_at: self.created_at,
            updated_at: self.created_at,
            updater_id: self.updater_id,
        }
    }
}

/// Partial update applied by callbacks and the reconciliation sweep.
///
/// `None` fields are left untouched. `open_at` only fills an empty column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordMutation {
    pub audit_state: Option<AuditState>,
    pub open_status: Option<OpenStatus>,
    pub audit_advice: Option<String>,
    pub audit_node: Option<AuditNode>,
    pub open_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RecordMutation {
    pub fn pass(now: DateTime<Utc>) -> Self {
        Self {
            audit_state: Some(AuditState::Pass),
            open_status: Some(OpenStatus::Opened),
            open_at: Some(now),
            updated_at: now,
            ..Default::default()
        }
    }

    pub fn reject(advice: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            audit_state: Some(AuditState::Reject),
            open_status: Some(OpenStatus::NotOpen),
            audit_advice: advice,
            updated_at: now,
            ..Default::default()
        }
    }

    pub fn undone(now: DateTime<Utc>) -> Self {
        Self {
            audit_state: Some(AuditState::Undone),
            open_status: Some(OpenStatus::NotOpen),
            updated_at: now,
            ..Default::default()
        }
    }

    pub fn advance(node: AuditNode, now: DateTime<Utc>) -> Self {
        Self {
            audit_node: Some(node),
            updated_at: now,
            ..Default::default()
        }
    }

    /// Apply to an in-memory copy.
    pub fn apply_to(&self, record: &mut OpenCatalogRecord) {
        if let Some(state) = self.audit_state {
            record.audit_state = state;
        }
        if let Some(status) = self.open_status {
            record.open_status = status;
        }
        if let Some(advice) = &self.audit_advice {
            record.audit_advice = Some(advice.clone());
        }
        if let Some(node) = &self.audit_node {
            record.audit_node = Some(node.clone());
        }
        if record.open_at.is_none() {
            record.open_at = self.open_at;
        }
        record.updated_at = self.updated_at;
    }
}

/// Extra predicate a callback mutation must satisfy besides the sequence match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationGuard {
    /// Stored `audit_state` the update targets.
    pub expected_state: AuditState,
    /// Skip when the record already sits at this node.
    pub node_differs_from: Option<String>,
}

impl MutationGuard {
    pub fn while_auditing() -> Self {
        Self {
            expected_state: AuditState::Auditing,
            node_differs_from: None,
        }
    }

    pub fn while_auditing_and_not_at(node_id: impl Into<String>) -> Self {
        Self {
            expected_state: AuditState::Auditing,
            node_differs_from: Some(node_id.into()),
        }
    }

    pub fn matches(&self, record: &OpenCatalogRecord) -> bool {
        if record.audit_state != self.expected_state {
            return false;
        }
        match (&self.node_differs_from, &record.audit_node) {
            (Some(target), Some(current)) => &current.id != target,
            _ => true,
        }
    }
}

/// Open policy declared by the source catalog entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenPolicy {
    #[default]
    Allowed,
    Conditional,
    Forbidden,
}

impl FromStr for OpenPolicy {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allowed" => Ok(Self::Allowed),
            "conditional" => Ok(Self::Conditional),
            "forbidden" => Ok(Self::Forbidden),
            other => Err(UnknownStatus {
                kind: "open_policy",
                value: other.to_string(),
            }),
        }
    }
}

/// Catalog entry a publication request refers to. Owned by the catalog system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub title: String,
    pub online: bool,
    pub open_policy: OpenPolicy,
}

/// Who performed a user action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitter {
    pub id: u64,
    pub name: String,
}
