use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Application name reported to the warehouse for every session opened by the job.
pub const APPLICATION_NAME: &str = "patron_merge_job";

/// Default Redshift port.
pub const DEFAULT_REDSHIFT_PORT: u16 = 5439;

/// Connection settings that do not depend on credential resolution.
///
/// Host, user and password are resolved at run time (see [`crate::shared::AuthConfig`]), so
/// they are not part of this struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedshiftConnectionConfig {
    /// Port number the cluster listens on.
    pub port: u16,
    /// Name of the database to connect to.
    pub name: String,
    /// TLS configuration for the connection.
    pub tls: TlsConfig,
    /// Server-side statement timeout in milliseconds. Zero disables the timeout.
    pub statement_timeout_ms: u32,
}

/// TLS settings for warehouse connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    pub trusted_root_certs: String,
    /// Whether TLS is enabled for the connection.
    pub enabled: bool,
}

impl TlsConfig {
    /// Returns a configuration with TLS turned off.
    pub fn disabled() -> Self {
        Self {
            trusted_root_certs: String::new(),
            enabled: false,
        }
    }

    /// Checks that certificates are present whenever TLS is enabled.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.trim().is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_requires_certs_when_enabled() {
        let tls = TlsConfig {
            trusted_root_certs: "  ".to_string(),
            enabled: true,
        };
        assert_eq!(tls.validate(), Err(ValidationError::MissingTrustedRootCerts));
        assert_eq!(TlsConfig::disabled().validate(), Ok(()));
    }
}
