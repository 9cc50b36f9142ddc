//! Credential materialization

use std::path::PathBuf;

use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::deploy::scratch::ScratchSpace;
use crate::errors::DeployError;
use crate::models::catalog::{Credential, CredentialSecret};

/// Write a credential's private key to an owner-only scratch file.
///
/// Returns the key path for SSH credentials and `None` for password
/// credentials, which produce no file.
pub async fn materialize(
    credential: &Credential,
    scratch: &mut ScratchSpace,
) -> Result<Option<PathBuf>, DeployError> {
    match &credential.secret {
        CredentialSecret::Ssh {
            private_key,
            passphrase,
        } => {
            if passphrase.is_some() {
                warn!(
                    "Credential {} has a passphrase; the key must be unlockable through ssh-agent",
                    credential.id
                );
            }

            // OpenSSH rejects key files without a trailing newline
            let key = private_key.expose_secret();
            let mut contents = Vec::with_capacity(key.len() + 1);
            contents.extend_from_slice(key.as_bytes());
            if !key.ends_with('\n') {
                contents.push(b'\n');
            }

            let file = scratch.key_file(&credential.id);
            scratch
                .write_private(&file, &contents)
                .await
                .map_err(|e| {
                    DeployError::Materialization(format!(
                        "cannot write key for credential {}: {}",
                        credential.id, e
                    ))
                })?;

            debug!(
                "Materialized credential {} to {}",
                credential.id,
                file.path().display()
            );
            Ok(Some(file.path().to_path_buf()))
        }
        CredentialSecret::Password { .. } => {
            debug!("Credential {} is a password, no key file", credential.id);
            Ok(None)
        }
    }
}
