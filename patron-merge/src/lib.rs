//! Staging to main table merge for patron records in Redshift.
//!
//! The job detects duplicated patron ids in the staging table, collapses groups of identical
//! rows, and then replaces main table rows with staging rows in a single transaction.

pub mod credentials;
pub mod error;
pub mod job;
mod macros;
pub mod queries;
pub mod reconcile;
pub mod response;
pub mod row;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
