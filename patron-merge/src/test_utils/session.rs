use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::credentials::DbCredentials;
use crate::error::{ErrorKind, MergeResult};
use crate::queries::SqlStatement;
use crate::row::StagingRow;
use crate::session::{SessionFactory, WarehouseSession};
use crate::{bail, merge_error};

/// A call received by a [`MemorySession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    FetchRows(String),
    Transaction(Vec<SqlStatement>),
    Close,
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<SessionCall>,
    responses: Vec<(String, Vec<StagingRow>)>,
    failing_fetch: Option<String>,
    failing_transaction: Option<usize>,
    transactions: usize,
    committed: Vec<Vec<SqlStatement>>,
    fail_close: bool,
    closed: bool,
}

/// In-memory [`WarehouseSession`] recording every call it receives.
///
/// Queries are answered with scripted rows: the first response whose pattern is contained in
/// the query text wins, and unmatched queries return no rows. Clones share state, so a test
/// can keep one handle while the job owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers queries containing `pattern` with `rows`.
    pub async fn respond_to(&self, pattern: &str, rows: Vec<StagingRow>) {
        let mut inner = self.inner.lock().await;
        inner.responses.push((pattern.to_string(), rows));
    }

    /// Makes queries containing `pattern` fail.
    pub async fn fail_fetch_containing(&self, pattern: &str) {
        let mut inner = self.inner.lock().await;
        inner.failing_fetch = Some(pattern.to_string());
    }

    /// Makes the transaction at `index` (zero based) fail and roll back.
    pub async fn fail_transaction(&self, index: usize) {
        let mut inner = self.inner.lock().await;
        inner.failing_transaction = Some(index);
    }

    /// Makes [`WarehouseSession::close`] fail.
    pub async fn fail_close(&self) {
        let mut inner = self.inner.lock().await;
        inner.fail_close = true;
    }

    /// Returns every call received so far.
    pub async fn calls(&self) -> Vec<SessionCall> {
        let inner = self.inner.lock().await;
        inner.calls.clone()
    }

    /// Returns the statements of every transaction that attempted to run.
    pub async fn transactions(&self) -> Vec<Vec<SqlStatement>> {
        let inner = self.inner.lock().await;
        inner
            .calls
            .iter()
            .filter_map(|call| match call {
                SessionCall::Transaction(statements) => Some(statements.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the statements of every committed transaction.
    pub async fn committed_transactions(&self) -> Vec<Vec<SqlStatement>> {
        let inner = self.inner.lock().await;
        inner.committed.clone()
    }

    /// Returns the text of every query issued through [`WarehouseSession::fetch_rows`].
    pub async fn queries(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .calls
            .iter()
            .filter_map(|call| match call {
                SessionCall::FetchRows(sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn is_closed(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.closed
    }
}

impl WarehouseSession for MemorySession {
    async fn fetch_rows(&self, sql: &str) -> MergeResult<Vec<StagingRow>> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(SessionCall::FetchRows(sql.to_string()));

        if let Some(pattern) = &inner.failing_fetch
            && sql.contains(pattern.as_str())
        {
            bail!(
                ErrorKind::QueryFailed,
                "Redshift query failed",
                format!("injected failure for `{pattern}`")
            );
        }

        let rows = inner
            .responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();

        Ok(rows)
    }

    async fn execute_transaction(&self, statements: &[SqlStatement]) -> MergeResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .calls
            .push(SessionCall::Transaction(statements.to_vec()));

        let index = inner.transactions;
        inner.transactions += 1;

        if inner.failing_transaction == Some(index) {
            info!(index, "rolling back injected transaction failure");

            bail!(
                ErrorKind::TransactionFailed,
                "Transaction failed and was rolled back",
                format!("injected failure for transaction {index}")
            );
        }

        inner.committed.push(statements.to_vec());

        Ok(())
    }

    async fn close(self) -> MergeResult<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(SessionCall::Close);
        inner.closed = true;

        if inner.fail_close {
            return Err(merge_error!(
                ErrorKind::ConnectionFailed,
                "Redshift connection task failed",
                "injected close failure"
            ));
        }

        Ok(())
    }
}

/// [`SessionFactory`] handing out clones of one [`MemorySession`].
#[derive(Debug, Clone, Default)]
pub struct MemorySessionFactory {
    session: MemorySession,
    opened: Arc<Mutex<Vec<String>>>,
    fail_open: bool,
}

impl MemorySessionFactory {
    pub fn new(session: MemorySession) -> Self {
        Self {
            session,
            opened: Arc::default(),
            fail_open: false,
        }
    }

    /// Creates a factory whose every open fails with a connection error.
    pub fn failing(session: MemorySession) -> Self {
        Self {
            fail_open: true,
            ..Self::new(session)
        }
    }

    /// Returns the user name of every session opened so far.
    pub async fn opened_as(&self) -> Vec<String> {
        self.opened.lock().await.clone()
    }
}

impl SessionFactory for MemorySessionFactory {
    type Session = MemorySession;

    async fn open(&self, credentials: DbCredentials) -> MergeResult<MemorySession> {
        if self.fail_open {
            bail!(
                ErrorKind::ConnectionFailed,
                "Redshift connection failed",
                format!("could not reach {}", credentials.host)
            );
        }

        self.opened.lock().await.push(credentials.username);

        Ok(self.session.clone())
    }
}
