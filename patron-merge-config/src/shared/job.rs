use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};

use crate::shared::{
    APPLICATION_NAME, AuthConfig, AuthMode, DEFAULT_REDSHIFT_PORT, RedshiftConnectionConfig,
    TableName, TlsConfig, ValidationError,
};

const fn default_port() -> u16 {
    DEFAULT_REDSHIFT_PORT
}

fn default_aws_region() -> String {
    JobConfig::DEFAULT_AWS_REGION.to_string()
}

/// Complete configuration of one merge job invocation.
///
/// Field names are the lowercase forms of the environment variables the job reads
/// (`REDSHIFT_DB_HOST` → `redshift_db_host`), so the struct can be populated from the
/// environment alone or from configuration files.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally leaking
/// secrets; use [`JobConfigWithoutSecrets`] for logging.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Warehouse host. A KMS ciphertext in [`AuthMode::EncryptedPassword`] mode.
    pub redshift_db_host: String,
    /// Warehouse port.
    #[serde(default = "default_port")]
    pub redshift_db_port: u16,
    /// Database name.
    pub redshift_db_name: String,
    /// Database user. A KMS ciphertext in [`AuthMode::EncryptedPassword`] mode.
    pub redshift_db_user: String,
    /// Database password. A KMS ciphertext in [`AuthMode::EncryptedPassword`] mode and unused
    /// in [`AuthMode::Iam`] mode.
    #[serde(default)]
    pub redshift_db_password: Option<SecretString>,
    /// Cluster identifier used to request IAM credentials.
    #[serde(default)]
    pub redshift_cluster: Option<String>,
    /// How credentials are obtained.
    #[serde(default)]
    pub redshift_auth_mode: AuthMode,
    /// Whether to connect over TLS.
    #[serde(default)]
    pub redshift_tls_enabled: bool,
    /// PEM-encoded roots trusted when TLS is enabled.
    #[serde(default)]
    pub redshift_tls_trusted_root_certs: String,
    /// Statement timeout applied to the session in milliseconds, zero for none.
    #[serde(default)]
    pub redshift_statement_timeout_ms: u32,
    /// Table receiving newly ingested rows.
    pub staging_table: String,
    /// System-of-record table the staging rows are merged into.
    pub main_table: String,
    /// Optional allow-list for `staging_table` and `main_table`.
    ///
    /// Accepts a list in files or a comma-separated string in the environment.
    #[serde(default, deserialize_with = "deserialize_table_list")]
    pub allowed_tables: Vec<String>,
    /// Fail instead of reconciling when staging holds more rows than distinct patron ids.
    #[serde(default)]
    pub require_unique_patron_ids: bool,
    /// Region used for the KMS and Redshift APIs.
    #[serde(default = "default_aws_region")]
    pub aws_region: String,
}

impl JobConfig {
    /// Region used when `AWS_REGION` is not set.
    pub const DEFAULT_AWS_REGION: &'static str = "us-east-1";

    /// Validates the complete job configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.auth_config()?;
        self.merge_tables()?;
        self.connection_config().tls.validate()?;

        Ok(())
    }

    /// Returns the credential material for the configured [`AuthMode`].
    pub fn auth_config(&self) -> Result<AuthConfig, ValidationError> {
        let host = non_empty("redshift_db_host", &self.redshift_db_host)?;
        let username = non_empty("redshift_db_user", &self.redshift_db_user)?;
        non_empty("redshift_db_name", &self.redshift_db_name)?;

        let password = || {
            self.redshift_db_password
                .as_ref()
                .filter(|password| !password.expose_secret().is_empty())
                .cloned()
                .ok_or(ValidationError::MissingPassword(self.redshift_auth_mode))
        };

        let auth = match self.redshift_auth_mode {
            AuthMode::Password => AuthConfig::Password {
                host,
                username,
                password: password()?,
            },
            AuthMode::EncryptedPassword => AuthConfig::EncryptedPassword {
                host,
                username,
                password: password()?,
            },
            AuthMode::Iam => {
                let cluster = self
                    .redshift_cluster
                    .as_deref()
                    .map(str::trim)
                    .filter(|cluster| !cluster.is_empty())
                    .ok_or(ValidationError::MissingCluster)?;

                AuthConfig::Iam {
                    host,
                    username,
                    cluster: cluster.to_string(),
                }
            }
        };

        Ok(auth)
    }

    /// Returns the validated staging and main tables together with the uniqueness flag.
    pub fn merge_tables(&self) -> Result<MergeTablesConfig, ValidationError> {
        let staging = TableName::parse(&self.staging_table)?;
        let main = TableName::parse(&self.main_table)?;

        if staging == main {
            return Err(ValidationError::SameStagingAndMainTable(staging.to_string()));
        }

        if !self.allowed_tables.is_empty() {
            let allowed = self
                .allowed_tables
                .iter()
                .map(|table| TableName::parse(table))
                .collect::<Result<Vec<_>, _>>()?;

            for table in [&staging, &main] {
                if !allowed.contains(table) {
                    return Err(ValidationError::TableNotAllowed(table.to_string()));
                }
            }
        }

        Ok(MergeTablesConfig {
            staging,
            main,
            require_unique_patron_ids: self.require_unique_patron_ids,
        })
    }

    /// Returns the connection settings that do not depend on credentials.
    pub fn connection_config(&self) -> RedshiftConnectionConfig {
        RedshiftConnectionConfig {
            port: self.redshift_db_port,
            name: self.redshift_db_name.clone(),
            tls: TlsConfig {
                trusted_root_certs: self.redshift_tls_trusted_root_certs.clone(),
                enabled: self.redshift_tls_enabled,
            },
            statement_timeout_ms: self.redshift_statement_timeout_ms,
        }
    }
}

/// Tables the merge operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeTablesConfig {
    /// Table holding newly staged rows.
    pub staging: TableName,
    /// Table the staged rows are merged into.
    pub main: TableName,
    /// When set, staging must already be unique by patron id and no reconciliation is done.
    pub require_unique_patron_ids: bool,
}

/// Same as [`JobConfig`] but without credentials.
///
/// Safe to serialize into logs. Host and user are left out as well since they are ciphertexts
/// or account names depending on the auth mode.
#[derive(Debug, Clone, Serialize)]
pub struct JobConfigWithoutSecrets {
    pub application_name: &'static str,
    pub auth_mode: AuthMode,
    pub cluster: Option<String>,
    pub connection: RedshiftConnectionConfigSummary,
    pub staging_table: String,
    pub main_table: String,
    pub allowed_tables: Vec<String>,
    pub require_unique_patron_ids: bool,
    pub aws_region: String,
}

/// Connection settings without the certificate bodies.
#[derive(Debug, Clone, Serialize)]
pub struct RedshiftConnectionConfigSummary {
    pub port: u16,
    pub name: String,
    pub tls_enabled: bool,
    pub statement_timeout_ms: u32,
}

impl From<&JobConfig> for JobConfigWithoutSecrets {
    fn from(value: &JobConfig) -> Self {
        JobConfigWithoutSecrets {
            application_name: APPLICATION_NAME,
            auth_mode: value.redshift_auth_mode,
            cluster: value.redshift_cluster.clone(),
            connection: RedshiftConnectionConfigSummary {
                port: value.redshift_db_port,
                name: value.redshift_db_name.clone(),
                tls_enabled: value.redshift_tls_enabled,
                statement_timeout_ms: value.redshift_statement_timeout_ms,
            },
            staging_table: value.staging_table.clone(),
            main_table: value.main_table.clone(),
            allowed_tables: value.allowed_tables.clone(),
            require_unique_patron_ids: value.require_unique_patron_ids,
            aws_region: value.aws_region.clone(),
        }
    }
}

fn non_empty(key: &'static str, value: &str) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::EmptyValue(key));
    }

    Ok(value.to_string())
}

/// Accepts either a sequence of names or a single comma-separated string.
fn deserialize_table_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TableList {
        Joined(String),
        List(Vec<String>),
    }

    let tables = match TableList::deserialize(deserializer)? {
        TableList::Joined(joined) => joined.split(',').map(str::to_string).collect(),
        TableList::List(list) => list,
    };

    Ok(tables
        .into_iter()
        .map(|table| table.trim().to_string())
        .filter(|table| !table.is_empty())
        .collect())
}
