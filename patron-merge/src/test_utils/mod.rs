//! Stand-ins for the warehouse and the credential services, and a real test database.

pub mod credentials;
pub mod database;
pub mod session;

use crate::row::StagingRow;

/// Builds a [`StagingRow`] from borrowed values.
pub fn staging_row(values: &[Option<&str>]) -> StagingRow {
    StagingRow::new(values.iter().map(|value| value.map(str::to_string)).collect())
}
