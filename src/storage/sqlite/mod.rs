//! SQLite implementations of storage interfaces.

mod queries;
mod record_store;
mod source_catalog;

pub use record_store::{SqliteOpenCatalogStore, SqliteStoreTransaction};
pub use source_catalog::SqliteSourceCatalog;
