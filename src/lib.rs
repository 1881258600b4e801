//! Opencatalog - publication requests with external workflow approval
//!
//! Tracks whether catalog entries are publicly opened. A request either opens
//! the entry directly or, when an audit process is bound, hands it to an
//! external workflow engine whose asynchronous callbacks decide the outcome.

pub mod audit;
pub mod bus;
pub mod callbacks;
pub mod config;
pub mod correlation;
pub mod eligibility;
pub mod model;
pub mod reconcile;
pub mod sequence;
pub mod storage;
pub mod utils;
pub mod workflow;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
