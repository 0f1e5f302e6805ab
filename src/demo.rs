//! End-to-end message-to-yourself run.
//!
//! Provisions an account, resolves it as its own recipient, encrypts the
//! payload for it, decrypts the result, and checks the round trip. Every
//! failure names the step it happened in.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::directory::{KeyDirectory, RecipientId};
use crate::envelope::EnvelopeCipher;
use crate::error::HelixError;
use crate::journal::FileJournalSink;
use crate::promise::{PromiseHandle, PromiseRegistry, PromiseStatus, Timeout};
use crate::recipient::RecipientHandle;
use crate::session::SessionState;
use crate::Engine;

/// Suffix of the ciphertext file written next to the input file.
pub const ENCRYPTED_SUFFIX: &str = "-encrypted.helix";

/// Suffix of the decrypted file written next to the input file.
pub const RESTORED_SUFFIX: &str = "-restored.helix";

/// The steps of a demo run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ReadInput,
    Startup,
    Connect,
    DeleteAccount,
    CreateAccount,
    Login,
    ResolveRecipient,
    Encrypt,
    WriteCiphertext,
    Decrypt,
    WriteRestored,
    Verify,
    Disconnect,
    Release,
    Shutdown,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadInput => "read input",
            Self::Startup => "startup",
            Self::Connect => "connect",
            Self::DeleteAccount => "delete account",
            Self::CreateAccount => "create account",
            Self::Login => "login",
            Self::ResolveRecipient => "resolve recipient",
            Self::Encrypt => "encrypt",
            Self::WriteCiphertext => "write ciphertext",
            Self::Decrypt => "decrypt",
            Self::WriteRestored => "write restored",
            Self::Verify => "verify",
            Self::Disconnect => "disconnect",
            Self::Release => "release",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// A demo run that did not complete.
#[derive(Debug, Error)]
pub enum DemoError {
    /// A client call returned an error.
    #[error("{step} failed: {source}")]
    Client {
        /// Where it happened.
        step: Step,
        /// What the client reported.
        source: HelixError,
    },

    /// An operation settled without data.
    #[error("{step} failed: operation settled as {status:?}")]
    Operation {
        /// Where it happened.
        step: Step,
        /// The terminal status.
        status: PromiseStatus,
    },

    /// Reading or writing a file failed.
    #[error("{step} failed: {}: {source}", path.display())]
    Io {
        /// Where it happened.
        step: Step,
        /// The file involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Decryption produced different bytes than were encrypted.
    #[error("verify failed: restored {restored} bytes differ from original {original} bytes")]
    Mismatch {
        /// Original payload size.
        original: usize,
        /// Restored payload size.
        restored: usize,
    },
}

impl DemoError {
    /// The step that failed.
    pub fn step(&self) -> Step {
        match self {
            Self::Client { step, .. } | Self::Operation { step, .. } | Self::Io { step, .. } => *step,
            Self::Mismatch { .. } => Step::Verify,
        }
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoReport {
    /// Account the payload was sealed for.
    pub recipient: RecipientId,
    /// Bytes read from the input.
    pub plaintext_len: usize,
    /// Bytes of ciphertext produced.
    pub ciphertext_len: usize,
    /// Where the ciphertext was written, if a file was given.
    pub encrypted_path: Option<PathBuf>,
    /// Where the decrypted bytes were written, if a file was given.
    pub restored_path: Option<PathBuf>,
}

fn at<E: Into<HelixError>>(step: Step) -> impl FnOnce(E) -> DemoError {
    move |err| DemoError::Client { step, source: err.into() }
}

fn io_at(step: Step, path: &Path) -> impl FnOnce(std::io::Error) -> DemoError + '_ {
    move |source| DemoError::Io { step, path: path.to_path_buf(), source }
}

/// `<file><suffix>`, next to the input file.
pub fn sibling_path(file: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(file.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

async fn expect_data(registry: &PromiseRegistry, handle: PromiseHandle, step: Step) -> Result<Vec<u8>, DemoError> {
    let status = registry.wait(handle, Timeout::Infinite).await.map_err(at(step))?;
    if status != PromiseStatus::DataAvailable {
        return Err(DemoError::Operation { step, status });
    }
    registry.get_result(handle).map_err(at(step))
}

fn load_payload(config: &ClientConfig) -> Result<Vec<u8>, DemoError> {
    match (&config.file, &config.message) {
        (Some(file), _) => {
            info!(file = %file.display(), "loading plain file");
            std::fs::read(file).map_err(io_at(Step::ReadInput, file))
        },
        (None, Some(message)) => Ok(message.as_bytes().to_vec()),
        (None, None) => Err(DemoError::Io {
            step: Step::ReadInput,
            path: PathBuf::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no message or file given"),
        }),
    }
}

/// Handles a run still owns and must give back.
#[derive(Debug, Default)]
struct Held {
    lookup: Option<PromiseHandle>,
    recipient: Option<RecipientHandle>,
    encrypt: Option<PromiseHandle>,
    decrypt: Option<PromiseHandle>,
}

/// Run the whole demo against `directory`. Must be called inside a tokio runtime.
///
/// A failed run still tears the session down as far as the lifecycle allows.
pub async fn run(config: &ClientConfig, directory: Arc<dyn KeyDirectory>) -> Result<DemoReport, DemoError> {
    let plaintext = load_payload(config)?;
    info!(bytes = plaintext.len(), "payload loaded");

    let engine = Engine::new(directory).map_err(at(Step::Startup))?;
    if let Some(path) = &config.journal {
        let sink = FileJournalSink::new(path).map_err(io_at(Step::Startup, path))?;
        engine.add_journal_sink(Box::new(sink));
    }

    let mut held = Held::default();
    let outcome = exchange(&engine, config, &plaintext, &mut held).await;
    if let Err(err) = &outcome {
        warn!(step = %err.step(), "run failed, tearing down");
        abandon(&engine, &held);
    }
    outcome
}

async fn exchange(
    engine: &Engine,
    config: &ClientConfig,
    plaintext: &[u8],
    held: &mut Held,
) -> Result<DemoReport, DemoError> {
    let session = engine.session();
    let registry = engine.registry();
    let user = config.username.as_str();

    info!(server = %config.server, port = config.port, "starting session");
    session.startup(&config.server, config.port, 0).map_err(at(Step::Startup))?;
    session.connect().map_err(at(Step::Connect))?;
    session.delete_account(user).map_err(at(Step::DeleteAccount))?;
    session.create_account(user).map_err(at(Step::CreateAccount))?;
    session.login(user).map_err(at(Step::Login))?;
    info!(connected = session.is_connected(), account = user, "session ready");

    // The lookup carries its own deadline, so waiting without one is bounded.
    let lookup = engine
        .recipients()
        .resolve_recipient(user, Timeout::Millis(config.lookup_timeout_ms))
        .map_err(at(Step::ResolveRecipient))?;
    held.lookup = Some(lookup);
    let status = registry.wait(lookup, Timeout::Infinite).await.map_err(at(Step::ResolveRecipient))?;
    if status != PromiseStatus::DataAvailable {
        return Err(DemoError::Operation { step: Step::ResolveRecipient, status });
    }
    let recipient = engine.recipients().recipient(lookup).map_err(at(Step::ResolveRecipient))?;
    held.recipient = Some(recipient);
    let recipient_id = engine.recipients().resolved(recipient).map_err(at(Step::ResolveRecipient))?.key.id;

    let password = config.password.as_deref();
    let encrypt = engine
        .cipher()
        .encrypt_start(recipient, plaintext, password)
        .map_err(at(Step::Encrypt))?;
    held.encrypt = Some(encrypt);
    let ciphertext = expect_data(registry, encrypt, Step::Encrypt).await?;
    if let Ok(envelope) = EnvelopeCipher::inspect(&ciphertext) {
        info!(bytes = ciphertext.len(), recipient = %envelope.recipient, password = envelope.password_protected, "payload encrypted");
    }

    let encrypted_path = config.file.as_deref().map(|file| sibling_path(file, ENCRYPTED_SUFFIX));
    if let Some(path) = &encrypted_path {
        std::fs::write(path, &ciphertext).map_err(io_at(Step::WriteCiphertext, path))?;
        info!(file = %path.display(), "ciphertext written");
    }

    let decrypt = engine
        .cipher()
        .decrypt_start(&ciphertext, password)
        .map_err(at(Step::Decrypt))?;
    held.decrypt = Some(decrypt);
    let restored = expect_data(registry, decrypt, Step::Decrypt).await?;

    if restored != plaintext {
        return Err(DemoError::Mismatch { original: plaintext.len(), restored: restored.len() });
    }

    let restored_path = config.file.as_deref().map(|file| sibling_path(file, RESTORED_SUFFIX));
    if let Some(path) = &restored_path {
        std::fs::write(path, &restored).map_err(io_at(Step::WriteRestored, path))?;
        info!(file = %path.display(), "restored payload written");
    }
    info!(original = plaintext.len(), restored = restored.len(), "round trip verified");

    session.disconnect().map_err(at(Step::Disconnect))?;

    // Promises go before the recipient they were issued against.
    for promise in [held.encrypt.take(), held.decrypt.take(), held.lookup.take()].into_iter().flatten() {
        registry.conclude(promise).map_err(at(Step::Release))?;
    }
    if let Some(recipient) = held.recipient.take() {
        engine.recipients().release(recipient).map_err(at(Step::Release))?;
    }

    session.shutdown().map_err(at(Step::Shutdown))?;
    info!("session shut down");

    Ok(DemoReport {
        recipient: recipient_id,
        plaintext_len: plaintext.len(),
        ciphertext_len: ciphertext.len(),
        encrypted_path,
        restored_path,
    })
}

/// Best-effort teardown after a failed run. Errors are logged and skipped.
fn abandon(engine: &Engine, held: &Held) {
    let session = engine.session();
    if session.is_connected() {
        if let Err(err) = session.disconnect() {
            debug!(%err, "teardown: disconnect");
        }
    }
    for promise in [held.encrypt, held.decrypt, held.lookup].into_iter().flatten() {
        if let Err(err) = engine.registry().conclude(promise) {
            debug!(%err, "teardown: conclude");
        }
    }
    if let Some(recipient) = held.recipient {
        if let Err(err) = engine.recipients().release(recipient) {
            debug!(%err, "teardown: release");
        }
    }
    if session.state() == SessionState::Disconnected {
        if let Err(err) = session.shutdown() {
            debug!(%err, "teardown: shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_path_appends_suffix() {
        let path = sibling_path(Path::new("/tmp/notes.txt"), ENCRYPTED_SUFFIX);
        assert_eq!(path, PathBuf::from("/tmp/notes.txt-encrypted.helix"));
    }

    #[test]
    fn mismatch_reports_verify_step() {
        let err = DemoError::Mismatch { original: 3, restored: 4 };
        assert_eq!(err.step(), Step::Verify);
    }
}
