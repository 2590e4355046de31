//! Resolution of the credentials used to open a warehouse session.

mod iam;
mod kms;

use std::fmt;
use std::future::Future;

use patron_merge_config::shared::AuthConfig;
use secrecy::{ExposeSecret, SecretString};
use tracing::{error, info};

use crate::error::MergeResult;

pub use iam::RedshiftCredentialsIssuer;
pub use kms::KmsDecrypter;

/// Decrypts credential ciphertexts.
pub trait SecretDecrypter {
    /// Decrypts a base64-encoded ciphertext into its plaintext.
    fn decrypt(&self, ciphertext: &str) -> impl Future<Output = MergeResult<SecretString>> + Send;
}

/// Temporary credentials issued for a cluster.
#[derive(Debug, Clone)]
pub struct IssuedCredentials {
    /// Database user the password was issued for. May carry a prefix such as `IAM:`.
    pub username: String,
    pub password: SecretString,
}

/// Issues temporary database credentials for a cluster.
pub trait ClusterCredentialsIssuer {
    fn issue(
        &self,
        cluster: &str,
        username: &str,
        database: &str,
    ) -> impl Future<Output = MergeResult<IssuedCredentials>> + Send;
}

/// Plaintext credentials ready to open a session with.
#[derive(Clone)]
pub struct DbCredentials {
    pub host: String,
    pub username: String,
    pub password: SecretString,
}

impl fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbCredentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Turns an [`AuthConfig`] into [`DbCredentials`].
///
/// Resolution consumes the resolver, so the KMS and Redshift API clients are released before
/// the warehouse session is opened.
#[derive(Debug)]
pub struct CredentialResolver<D, I> {
    decrypter: D,
    issuer: I,
}

impl<D, I> CredentialResolver<D, I>
where
    D: SecretDecrypter,
    I: ClusterCredentialsIssuer,
{
    pub fn new(decrypter: D, issuer: I) -> Self {
        Self { decrypter, issuer }
    }

    /// Resolves the credentials for `auth`, connecting to `database`.
    pub async fn resolve(self, auth: &AuthConfig, database: &str) -> MergeResult<DbCredentials> {
        info!(auth_mode = %auth.mode(), "resolving warehouse credentials");

        let credentials = match auth {
            AuthConfig::Password {
                host,
                username,
                password,
            } => DbCredentials {
                host: host.clone(),
                username: username.clone(),
                password: password.clone(),
            },
            AuthConfig::EncryptedPassword {
                host,
                username,
                password,
            } => {
                let host = self.decrypt_field("host", host).await?;
                let username = self.decrypt_field("username", username).await?;
                let password = self
                    .decrypt_field("password", password.expose_secret())
                    .await?;

                DbCredentials {
                    host: host.expose_secret().to_string(),
                    username: username.expose_secret().to_string(),
                    password,
                }
            }
            AuthConfig::Iam {
                host,
                username,
                cluster,
            } => {
                let issued = self
                    .issuer
                    .issue(cluster, username, database)
                    .await
                    .inspect_err(|err| {
                        error!(%cluster, error = %err, "could not issue cluster credentials");
                    })?;

                DbCredentials {
                    host: host.clone(),
                    username: issued.username,
                    password: issued.password,
                }
            }
        };

        Ok(credentials)
    }

    async fn decrypt_field(&self, field: &'static str, ciphertext: &str) -> MergeResult<SecretString> {
        self.decrypter
            .decrypt(ciphertext)
            .await
            .inspect_err(|err| error!(field, error = %err, "could not decrypt credential"))
    }
}
