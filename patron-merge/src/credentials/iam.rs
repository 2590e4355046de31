use aws_sdk_redshift::Client;
use aws_sdk_redshift::error::DisplayErrorContext;
use secrecy::SecretString;
use tracing::info;

use crate::bail;
use crate::credentials::{ClusterCredentialsIssuer, IssuedCredentials};
use crate::error::{ErrorKind, MergeResult};
use crate::merge_error;

/// [`ClusterCredentialsIssuer`] calling Redshift `GetClusterCredentials`.
///
/// The issued user must already exist; it is never auto-created.
#[derive(Debug, Clone)]
pub struct RedshiftCredentialsIssuer {
    client: Client,
}

impl RedshiftCredentialsIssuer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl ClusterCredentialsIssuer for RedshiftCredentialsIssuer {
    async fn issue(
        &self,
        cluster: &str,
        username: &str,
        database: &str,
    ) -> MergeResult<IssuedCredentials> {
        let output = self
            .client
            .get_cluster_credentials()
            .cluster_identifier(cluster)
            .db_user(username)
            .db_name(database)
            .auto_create(false)
            .send()
            .await
            .map_err(|err| {
                merge_error!(
                    ErrorKind::CredentialIssueFailed,
                    "Redshift could not issue cluster credentials",
                    DisplayErrorContext(&err).to_string(),
                    source: err
                )
            })?;

        let (Some(issued_user), Some(password)) = (output.db_user(), output.db_password()) else {
            bail!(
                ErrorKind::CredentialIssueFailed,
                "Redshift returned incomplete cluster credentials",
                format!("cluster {cluster}")
            );
        };

        info!(
            %cluster,
            expiration = ?output.expiration(),
            "issued temporary cluster credentials"
        );

        Ok(IssuedCredentials {
            username: issued_user.to_string(),
            password: SecretString::from(password.to_string()),
        })
    }
}
