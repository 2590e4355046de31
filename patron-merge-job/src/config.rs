use patron_merge_config::load_config;
use patron_merge_config::shared::JobConfig;

use crate::error::{JobError, JobResult};

/// Loads and validates the job configuration.
pub fn load_job_config() -> JobResult<JobConfig> {
    let config = load_config::<JobConfig>().map_err(JobError::config)?;
    config.validate().map_err(JobError::config)?;

    Ok(config)
}
