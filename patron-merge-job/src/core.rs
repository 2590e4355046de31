use aws_config::{BehaviorVersion, Region};
use patron_merge::credentials::{CredentialResolver, KmsDecrypter, RedshiftCredentialsIssuer};
use patron_merge::job::{MergeJob, MergeJobConfig};
use patron_merge::response::JobResponse;
use patron_merge::session::RedshiftSessionFactory;
use patron_merge_config::shared::{JobConfig, JobConfigWithoutSecrets};
use tracing::{debug, info};

use crate::error::{JobError, JobResult};

/// Builds the merge job from `config` and runs it for `event`.
pub async fn run_job_with_config(
    config: JobConfig,
    event: serde_json::Value,
) -> JobResult<JobResponse> {
    info!("starting patron merge job");

    log_config(&config);

    let auth = config.auth_config().map_err(JobError::config)?;
    let tables = config.merge_tables().map_err(JobError::config)?;

    let aws_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.aws_region.clone()))
        .load()
        .await;

    // The API clients live in the resolver, which is consumed before the session opens.
    let resolver = CredentialResolver::new(
        KmsDecrypter::new(aws_sdk_kms::Client::new(&aws_config)),
        RedshiftCredentialsIssuer::new(aws_sdk_redshift::Client::new(&aws_config)),
    );
    let factory = RedshiftSessionFactory::new(config.connection_config());

    let job = MergeJob::new(
        resolver,
        factory,
        MergeJobConfig {
            auth,
            database: config.redshift_db_name.clone(),
            tables,
        },
    );

    Ok(job.handle(event).await?)
}

fn log_config(config: &JobConfig) {
    let config = JobConfigWithoutSecrets::from(config);

    debug!(
        auth_mode = %config.auth_mode,
        cluster = config.cluster.as_deref(),
        port = config.connection.port,
        database = config.connection.name,
        tls_enabled = config.connection.tls_enabled,
        statement_timeout_ms = config.connection.statement_timeout_ms,
        staging_table = config.staging_table,
        main_table = config.main_table,
        allowed_tables = ?config.allowed_tables,
        require_unique_patron_ids = config.require_unique_patron_ids,
        aws_region = config.aws_region,
        "using job config"
    );
}
