//! Audit eligibility.
//!
//! Two questions are answered before a record may enter the pipeline:
//! whether the source entry may be published at all ([`check_eligible`]), and
//! whether an audit process is bound to the open-catalog audit type
//! ([`ProcessBindings::resolve_bound_process`]). No bound process is not an
//! error; it means the request is approved on the spot.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{OpenPolicy, SourceRecord};
use crate::storage::Result;

/// Why a source entry may not be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibleReason {
    NotOnline,
    OpenForbidden,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOnline => f.write_str("source catalog is not online"),
            Self::OpenForbidden => f.write_str("source catalog forbids opening"),
        }
    }
}

/// Decide whether a source entry may enter the audit pipeline.
pub fn check_eligible(source: &SourceRecord) -> std::result::Result<(), IneligibleReason> {
    if !source.online {
        return Err(IneligibleReason::NotOnline);
    }
    if source.open_policy == OpenPolicy::Forbidden {
        return Err(IneligibleReason::OpenForbidden);
    }
    Ok(())
}

/// Lookup of the catalog entries publication requests refer to.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn get_source(&self, source_id: &str) -> Result<Option<SourceRecord>>;
}

/// Lookup of the process definition bound to an audit type.
#[async_trait]
pub trait ProcessBindings: Send + Sync {
    /// `None` means no audit process is configured for `audit_type`.
    async fn resolve_bound_process(&self, audit_type: &str) -> Result<Option<String>>;
}

/// Process bindings taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticProcessBindings {
    bindings: HashMap<String, String>,
}

impl StaticProcessBindings {
    pub fn new(bindings: HashMap<String, String>) -> Self {
        Self { bindings }
    }

    pub fn with_binding(mut self, audit_type: impl Into<String>, key: impl Into<String>) -> Self {
        self.bindings.insert(audit_type.into(), key.into());
        self
    }
}

#[async_trait]
impl ProcessBindings for StaticProcessBindings {
    async fn resolve_bound_process(&self, audit_type: &str) -> Result<Option<String>> {
        Ok(self
            .bindings
            .get(audit_type)
            .filter(|key| !key.is_empty())
            .cloned())
    }
}

/// In-memory source catalog.
#[derive(Debug, Default)]
pub struct InMemorySourceCatalog {
    sources: RwLock<HashMap<String, SourceRecord>>,
}

impl InMemorySourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, source: SourceRecord) {
        self.sources.write().await.insert(source.id.clone(), source);
    }
}

#[async_trait]
impl SourceCatalog for InMemorySourceCatalog {
    async fn get_source(&self, source_id: &str) -> Result<Option<SourceRecord>> {
        Ok(self.sources.read().await.get(source_id).cloned())
    }
}
