use aws_sdk_kms::Client;
use aws_sdk_kms::error::DisplayErrorContext;
use aws_sdk_kms::primitives::Blob;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::SecretString;
use tracing::debug;

use crate::bail;
use crate::credentials::SecretDecrypter;
use crate::error::{ErrorKind, MergeResult};
use crate::merge_error;

/// [`SecretDecrypter`] backed by AWS KMS.
///
/// Ciphertexts are base64-encoded KMS blobs. The plaintext must be valid UTF-8.
#[derive(Debug, Clone)]
pub struct KmsDecrypter {
    client: Client,
}

impl KmsDecrypter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl SecretDecrypter for KmsDecrypter {
    async fn decrypt(&self, ciphertext: &str) -> MergeResult<SecretString> {
        let blob = STANDARD.decode(ciphertext.trim())?;

        debug!(ciphertext_len = blob.len(), "decrypting credential with kms");

        let output = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(blob))
            .send()
            .await
            .map_err(|err| {
                merge_error!(
                    ErrorKind::CredentialDecryptionFailed,
                    "KMS could not decrypt credential",
                    DisplayErrorContext(&err).to_string(),
                    source: err
                )
            })?;

        let Some(plaintext) = output.plaintext() else {
            bail!(
                ErrorKind::CredentialDecryptionFailed,
                "KMS returned no plaintext"
            );
        };

        let plaintext = String::from_utf8(plaintext.as_ref().to_vec())?;

        Ok(SecretString::from(plaintext))
    }
}
