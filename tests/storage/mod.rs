//! Storage interface tests.
//!
//! Contract tests shared by every `OpenCatalogStore` implementation.

pub mod open_catalog_store_tests;
