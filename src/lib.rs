//! # helix-client
//!
//! Promise-based secure session client.
//!
//! A session connects to a key server, provisions and logs in an account,
//! resolves recipients, and encrypts or decrypts payloads for them. Every
//! long-running call returns a [`PromiseHandle`](promise::PromiseHandle)
//! that is awaited through the [`PromiseRegistry`](promise::PromiseRegistry).
//!
//! ## Public API
//!
//! Build one [`Engine`] per process inside a tokio runtime and reach the
//! four components through it:
//!
//! - [`Engine::session`]: lifecycle (startup, connect, accounts, shutdown)
//! - [`Engine::registry`]: wait, peek, read, and conclude promises
//! - [`Engine::recipients`]: resolve names to recipient handles
//! - [`Engine::cipher`]: start encrypt and decrypt operations

pub(crate) mod crypto;
pub mod config;
pub mod demo;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod journal;
pub mod keys;
pub mod pipeline;
pub mod promise;
pub mod recipient;
pub mod session;

use std::sync::Arc;

use directory::KeyDirectory;
use envelope::EnvelopeCipher;
use error::HelixError;
use journal::{Journal, JournalSink, SharedJournal};
use pipeline::{Cipher, CipherPipeline};
use promise::PromiseRegistry;
use recipient::RecipientDirectory;
use session::SessionManager;

/// Version of the client-facing interface.
pub const INTERFACE_VERSION: u32 = 1;

/// Process-wide engine handle owning the session and its collaborators.
///
/// Construction is explicit; nothing is loaded or started implicitly.
#[derive(Debug)]
pub struct Engine {
    session: SessionManager,
    registry: PromiseRegistry,
    recipients: RecipientDirectory,
    cipher: CipherPipeline,
    journal: SharedJournal,
}

impl Engine {
    /// Build an engine using the default envelope cipher.
    ///
    /// Must be called from within a tokio runtime; operations are spawned
    /// onto it.
    pub fn new(directory: Arc<dyn KeyDirectory>) -> Result<Self, HelixError> {
        Self::with_cipher(directory, Arc::new(EnvelopeCipher))
    }

    /// Build an engine around a custom cipher.
    pub fn with_cipher(directory: Arc<dyn KeyDirectory>, cipher: Arc<dyn Cipher>) -> Result<Self, HelixError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| HelixError::Runtime(err.to_string()))?;
        let journal = Journal::shared();
        let registry = PromiseRegistry::new(runtime, journal.clone());
        let session = SessionManager::new(directory, registry.clone(), journal.clone());
        let recipients = RecipientDirectory::new(session.clone(), registry.clone());
        let cipher = CipherPipeline::new(session.clone(), registry.clone(), recipients.clone(), cipher);
        Ok(Self { session, registry, recipients, cipher, journal })
    }

    /// Session lifecycle.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Promise registry.
    pub fn registry(&self) -> &PromiseRegistry {
        &self.registry
    }

    /// Recipient lookups.
    pub fn recipients(&self) -> &RecipientDirectory {
        &self.recipients
    }

    /// Encrypt and decrypt operations.
    pub fn cipher(&self) -> &CipherPipeline {
        &self.cipher
    }

    /// The operation journal.
    pub fn journal(&self) -> &SharedJournal {
        &self.journal
    }

    /// Forward every journal record to `sink` as well.
    pub fn add_journal_sink(&self, sink: Box<dyn JournalSink>) {
        directory::lock(&self.journal).add_forward_sink(sink);
    }
}
