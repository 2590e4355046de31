use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use secrecy::SecretString;

use crate::credentials::{ClusterCredentialsIssuer, IssuedCredentials, SecretDecrypter};
use crate::error::{ErrorKind, MergeResult};
use crate::{bail, merge_error};

/// Decrypter returning `plain:<ciphertext>` for every ciphertext it was not told to reject.
#[derive(Debug, Clone, Default)]
pub struct FakeDecrypter {
    rejected: Arc<HashSet<String>>,
    calls: Arc<AtomicUsize>,
}

impl FakeDecrypter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a decrypter that fails for `ciphertext`.
    pub fn failing_on(ciphertext: &str) -> Self {
        Self {
            rejected: Arc::new(HashSet::from([ciphertext.to_string()])),
            calls: Arc::default(),
        }
    }

    /// Returns how many decryptions were attempted.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SecretDecrypter for FakeDecrypter {
    async fn decrypt(&self, ciphertext: &str) -> MergeResult<SecretString> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.rejected.contains(ciphertext) {
            bail!(
                ErrorKind::CredentialDecryptionFailed,
                "KMS could not decrypt credential",
                "access denied"
            );
        }

        Ok(SecretString::from(format!("plain:{ciphertext}")))
    }
}

/// Issuer returning `IAM:<user>` with password `temporary:<cluster>:<database>`.
#[derive(Debug, Clone, Default)]
pub struct FakeIssuer {
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl FakeIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an issuer whose every call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: Arc::default(),
        }
    }

    /// Returns how many credentials were requested.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ClusterCredentialsIssuer for FakeIssuer {
    async fn issue(
        &self,
        cluster: &str,
        username: &str,
        database: &str,
    ) -> MergeResult<IssuedCredentials> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            return Err(merge_error!(
                ErrorKind::CredentialIssueFailed,
                "Redshift could not issue cluster credentials",
                format!("cluster {cluster}")
            ));
        }

        Ok(IssuedCredentials {
            username: format!("IAM:{username}"),
            password: SecretString::from(format!("temporary:{cluster}:{database}")),
        })
    }
}
