use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// How the job obtains the credentials it connects with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Host, user and password are used as configured.
    Password,
    /// Host, user and password are KMS ciphertexts that are decrypted before use.
    #[default]
    #[serde(alias = "encrypted-password")]
    EncryptedPassword,
    /// A temporary password is issued for the configured cluster and user.
    Iam,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Password => f.write_str("password"),
            AuthMode::EncryptedPassword => f.write_str("encrypted_password"),
            AuthMode::Iam => f.write_str("iam"),
        }
    }
}

/// Credential material for one [`AuthMode`], extracted from a validated job configuration.
///
/// This intentionally does not implement [`Serialize`] to avoid leaking secrets.
#[derive(Debug, Clone)]
pub enum AuthConfig {
    /// Plaintext credentials.
    Password {
        host: String,
        username: String,
        password: SecretString,
    },
    /// Base64-encoded KMS ciphertexts for each credential.
    EncryptedPassword {
        host: String,
        username: String,
        password: SecretString,
    },
    /// IAM-issued temporary credentials for `cluster`.
    Iam {
        host: String,
        username: String,
        cluster: String,
    },
}

impl AuthConfig {
    /// Returns the mode this configuration belongs to.
    pub fn mode(&self) -> AuthMode {
        match self {
            AuthConfig::Password { .. } => AuthMode::Password,
            AuthConfig::EncryptedPassword { .. } => AuthMode::EncryptedPassword,
            AuthConfig::Iam { .. } => AuthMode::Iam,
        }
    }
}
