//! The merge job: credential resolution, duplicate handling and the main merge transaction.

use patron_merge_config::shared::{AuthConfig, MergeTablesConfig, TableName};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::bail;
use crate::credentials::{ClusterCredentialsIssuer, CredentialResolver, SecretDecrypter};
use crate::error::{ErrorKind, MergeResult};
use crate::queries::{
    delete_duplicates_statements, duplicates_query, insert_staging_row_statement,
    integrity_check_query, main_merge_statements,
};
use crate::reconcile::{DuplicateSet, reconcile_duplicates};
use crate::response::JobResponse;
use crate::session::{SessionFactory, WarehouseSession};

/// Everything the job needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct MergeJobConfig {
    pub auth: AuthConfig,
    /// Database the session connects to. Also used when issuing IAM credentials.
    pub database: String,
    pub tables: MergeTablesConfig,
}

/// Summary of a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Number of patron ids whose staged rows were collapsed before merging.
    pub duplicate_groups: usize,
    /// Whether staging uniqueness was verified with the integrity check.
    pub integrity_checked: bool,
}

/// A single invocation of the staging to main merge.
///
/// The job is consumed by [`MergeJob::run`]: credentials are resolved, one session is opened,
/// the merge runs, and the session is closed on every path.
#[derive(Debug)]
pub struct MergeJob<D, I, F> {
    resolver: CredentialResolver<D, I>,
    factory: F,
    config: MergeJobConfig,
}

impl<D, I, F> MergeJob<D, I, F>
where
    D: SecretDecrypter,
    I: ClusterCredentialsIssuer,
    F: SessionFactory,
{
    pub fn new(resolver: CredentialResolver<D, I>, factory: F, config: MergeJobConfig) -> Self {
        Self {
            resolver,
            factory,
            config,
        }
    }

    /// Entry point for a scheduler trigger.
    ///
    /// The event content is not interpreted.
    pub async fn handle(self, event: serde_json::Value) -> MergeResult<JobResponse> {
        debug!(%event, "received trigger event");

        self.run().await?;

        JobResponse::success()
    }

    /// Runs the merge inside a `merge_job` span carrying a fresh run id.
    pub async fn run(self) -> MergeResult<MergeReport> {
        let span = info_span!(
            "merge_job",
            run_id = %Uuid::new_v4(),
            staging = %self.config.tables.staging,
            main = %self.config.tables.main,
        );

        self.run_in_span().instrument(span).await
    }

    async fn run_in_span(self) -> MergeResult<MergeReport> {
        let MergeJob {
            resolver,
            factory,
            config,
        } = self;

        info!(
            auth_mode = %config.auth.mode(),
            require_unique_patron_ids = config.tables.require_unique_patron_ids,
            "starting patron merge"
        );

        let credentials = resolver.resolve(&config.auth, &config.database).await?;
        let session = factory
            .open(credentials)
            .await
            .inspect_err(|err| error!(error = %err, "could not open warehouse session"))?;

        let result = merge(&session, &config.tables).await;
        let closed = session.close().await;

        match (result, closed) {
            (Ok(report), Ok(())) => {
                info!(
                    duplicate_groups = report.duplicate_groups,
                    integrity_checked = report.integrity_checked,
                    "finished patron merge"
                );

                Ok(report)
            }
            (Ok(report), Err(close_err)) => {
                warn!(error = %close_err, "merge committed but the session did not close cleanly");

                Ok(report)
            }
            (Err(err), Ok(())) => {
                error!(kind = %err.kind(), error = %err, "patron merge failed");

                Err(err)
            }
            (Err(err), Err(close_err)) => {
                error!(kind = %err.kind(), error = %err, "patron merge failed");
                error!(error = %close_err, "session did not close cleanly after the failure");

                Err(err)
            }
        }
    }
}

/// Runs the duplicate handling and the main merge on an open session.
async fn merge<S>(session: &S, tables: &MergeTablesConfig) -> MergeResult<MergeReport>
where
    S: WarehouseSession,
{
    let mut report = MergeReport::default();

    if tables.require_unique_patron_ids {
        check_unique_patron_ids(session, &tables.staging).await?;
        report.integrity_checked = true;
    } else {
        let duplicates = find_duplicates(session, &tables.staging).await?;
        report.duplicate_groups = duplicates.len();

        if !duplicates.is_empty() {
            collapse_duplicates(session, &tables.staging, &duplicates).await?;
        }
    }

    info!("merging staging rows into main table");
    session
        .execute_transaction(&main_merge_statements(&tables.staging, &tables.main))
        .await?;

    Ok(report)
}

/// Reads every duplicated staging row and reduces it to canonical rows.
async fn find_duplicates<S>(session: &S, staging: &TableName) -> MergeResult<DuplicateSet>
where
    S: WarehouseSession,
{
    info!("checking for duplicate records");

    let rows = session.fetch_rows(&duplicates_query(staging)).await?;
    debug!(rows = rows.len(), "fetched duplicated staging rows");

    reconcile_duplicates(rows)
}

/// Replaces every duplicate group with its canonical row in one transaction.
async fn collapse_duplicates<S>(
    session: &S,
    staging: &TableName,
    duplicates: &DuplicateSet,
) -> MergeResult<()>
where
    S: WarehouseSession,
{
    info!(
        duplicate_groups = duplicates.len(),
        "collapsing duplicate staging rows"
    );

    let mut statements = delete_duplicates_statements(staging, duplicates.patron_ids());
    statements.extend(
        duplicates
            .canonical_rows()
            .iter()
            .map(|row| insert_staging_row_statement(staging, row)),
    );

    session.execute_transaction(&statements).await
}

/// Fails unless every staged patron id is distinct.
async fn check_unique_patron_ids<S>(session: &S, staging: &TableName) -> MergeResult<()>
where
    S: WarehouseSession,
{
    info!("checking staging patron id uniqueness");

    let rows = session.fetch_rows(&integrity_check_query(staging)).await?;
    let Some(row) = rows.first() else {
        bail!(
            ErrorKind::InvalidData,
            "Integrity check returned no rows"
        );
    };

    let total = parse_count(row.get(0).flatten())?;
    let distinct = parse_count(row.get(1).flatten())?;

    if total != distinct {
        bail!(
            ErrorKind::IntegrityCheckFailed,
            "Staging table contains duplicate patron ids",
            format!("{total} rows but {distinct} distinct patron ids")
        );
    }

    debug!(rows = total, "staging patron ids are unique");

    Ok(())
}

fn parse_count(value: Option<&str>) -> MergeResult<u64> {
    let Some(value) = value else {
        bail!(ErrorKind::InvalidData, "Integrity check returned a null count");
    };

    match value.trim().parse() {
        Ok(count) => Ok(count),
        Err(_) => bail!(
            ErrorKind::InvalidData,
            "Integrity check returned a non numeric count",
            value
        ),
    }
}
