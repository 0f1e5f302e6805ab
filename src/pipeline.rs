//! Cipher operation pipeline.
//!
//! Encrypt and decrypt run as promises on the blocking pool. The concrete
//! cipher is pluggable through [`Cipher`]; the crate ships
//! [`EnvelopeCipher`](crate::envelope::EnvelopeCipher).

use std::fmt;
use std::sync::Arc;

use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{CipherError, HelixError};
use crate::keys::{LocalIdentity, RecipientKey};
use crate::promise::{PromiseHandle, PromiseKind, PromiseRegistry, Settlement};
use crate::recipient::{RecipientDirectory, RecipientHandle};
use crate::session::SessionManager;

/// A recipient-keyed cipher with an optional shared password.
///
/// For every plaintext `p` and password `q`,
/// `open(local, seal(local_key, p, q)?, q)` must return exactly `p`.
pub trait Cipher: Send + Sync {
    /// Encrypt `plaintext` for `recipient`.
    fn seal(&self, recipient: &RecipientKey, plaintext: &[u8], password: Option<&str>) -> Result<Vec<u8>, CipherError>;

    /// Decrypt a blob addressed to the local account.
    fn open(&self, local: &LocalIdentity, blob: &[u8], password: Option<&str>) -> Result<Vec<u8>, CipherError>;
}

/// Drives encrypt and decrypt as asynchronous operations.
#[derive(Clone)]
pub struct CipherPipeline {
    session: SessionManager,
    registry: PromiseRegistry,
    recipients: RecipientDirectory,
    cipher: Arc<dyn Cipher>,
}

impl fmt::Debug for CipherPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherPipeline").finish_non_exhaustive()
    }
}

impl CipherPipeline {
    /// Build a pipeline around `cipher`.
    pub fn new(
        session: SessionManager,
        registry: PromiseRegistry,
        recipients: RecipientDirectory,
        cipher: Arc<dyn Cipher>,
    ) -> Self {
        Self { session, registry, recipients, cipher }
    }

    /// Start encrypting `plaintext` for `recipient`. Never blocks.
    ///
    /// Fails up front when the session is not logged in or the recipient
    /// handle has been released; cipher failures surface as `Failed`.
    pub fn encrypt_start(
        &self,
        recipient: RecipientHandle,
        plaintext: &[u8],
        password: Option<&str>,
    ) -> Result<PromiseHandle, HelixError> {
        self.session.require_logged_in("encrypt_start")?;
        let resolved = self.recipients.resolved(recipient)?;

        let cipher = Arc::clone(&self.cipher);
        let plaintext = Zeroizing::new(plaintext.to_vec());
        let password = password.map(|p| Zeroizing::new(p.to_string()));

        Ok(self.registry.begin_blocking(PromiseKind::Encrypt, move || {
            match cipher.seal(&resolved.key, &plaintext, password.as_deref().map(String::as_str)) {
                Ok(blob) => Settlement::Data(blob),
                Err(err) => {
                    debug!(%err, recipient = %resolved.name, "encrypt failed");
                    Settlement::Failed
                },
            }
        }))
    }

    /// Start decrypting `blob` with the logged-in account's key. Never blocks.
    pub fn decrypt_start(&self, blob: &[u8], password: Option<&str>) -> Result<PromiseHandle, HelixError> {
        let local = self.session.local_identity("decrypt_start")?;

        let cipher = Arc::clone(&self.cipher);
        let blob = blob.to_vec();
        let password = password.map(|p| Zeroizing::new(p.to_string()));

        Ok(self.registry.begin_blocking(PromiseKind::Decrypt, move || {
            match cipher.open(&local, &blob, password.as_deref().map(String::as_str)) {
                Ok(plaintext) => Settlement::Data(plaintext),
                Err(err) => {
                    debug!(%err, "decrypt failed");
                    Settlement::Failed
                },
            }
        }))
    }
}
