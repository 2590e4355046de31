use thiserror::Error;

use crate::shared::AuthMode;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required value was present but empty.
    #[error("`{0}` cannot be empty")]
    EmptyValue(&'static str),
    /// The selected auth mode needs `redshift_db_password`.
    #[error("`redshift_db_password` must be set when `redshift_auth_mode` is `{0}`")]
    MissingPassword(AuthMode),
    /// IAM authentication needs the cluster identifier to request credentials for.
    #[error("`redshift_cluster` must be set when `redshift_auth_mode` is `iam`")]
    MissingCluster,
    /// TLS is enabled but no trusted root certificates are provided.
    #[error(
        "Invalid TLS config: `redshift_tls_trusted_root_certs` must be set when `redshift_tls_enabled` is true"
    )]
    MissingTrustedRootCerts,
    /// A table name is not a plain, optionally schema-qualified, identifier.
    #[error("invalid table name `{name}`: {reason}")]
    InvalidTableName { name: String, reason: &'static str },
    /// An allow-list is configured and the table is not on it.
    #[error("table `{0}` is not in `allowed_tables`")]
    TableNotAllowed(String),
    /// Staging and main resolve to the same table, which would make the merge destroy data.
    #[error("`staging_table` and `main_table` both name `{0}`")]
    SameStagingAndMainTable(String),
}
