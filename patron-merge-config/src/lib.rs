//! Configuration for the patron merge job.
//!
//! Configuration is layered: optional files under `configuration/` provide defaults, and
//! environment variables such as `REDSHIFT_DB_HOST` or `STAGING_TABLE` override them.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{LoadConfigError, load_config, load_config_from};
