//! Warehouse sessions the merge job runs its statements on.

mod redshift;

use std::future::Future;

use crate::credentials::DbCredentials;
use crate::error::MergeResult;
use crate::queries::SqlStatement;
use crate::row::StagingRow;

pub use redshift::{RedshiftSession, RedshiftSessionFactory};

/// A single connection to the warehouse.
///
/// Statements are issued one at a time; callers await each call before issuing the next.
pub trait WarehouseSession {
    /// Runs a query and returns every row it produced as text values.
    fn fetch_rows(&self, sql: &str) -> impl Future<Output = MergeResult<Vec<StagingRow>>> + Send;

    /// Runs `statements` in order inside one transaction.
    ///
    /// Either every statement is committed or the transaction is rolled back and an error of
    /// kind [`crate::error::ErrorKind::TransactionFailed`] is returned.
    fn execute_transaction(
        &self,
        statements: &[SqlStatement],
    ) -> impl Future<Output = MergeResult<()>> + Send;

    /// Closes the session.
    fn close(self) -> impl Future<Output = MergeResult<()>> + Send;
}

/// Opens [`WarehouseSession`]s from resolved credentials.
pub trait SessionFactory {
    type Session: WarehouseSession + Send + Sync;

    fn open(
        &self,
        credentials: DbCredentials,
    ) -> impl Future<Output = MergeResult<Self::Session>> + Send;
}
