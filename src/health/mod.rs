//! Node health evaluation
//!
//! This module provides:
//! - Manual override sentinels (force up / force fail)
//! - Galera replication state and read_only checks
//! - Mapping of the outcome to an HTTP status and body

mod evaluator;
mod status;
mod verdict;

pub use evaluator::{HealthEvaluator, STATE_DONOR, STATE_SYNCED};
pub use status::{
    CheckError, MySqlStatusSource, NodeProbe, StatusSource, LOCAL_STATE_QUERY, READ_ONLY_QUERY,
};
pub use verdict::Verdict;
