//! Error types for the helix client.
//!
//! Each component owns its error enum. Cipher failures stay inside the
//! promise: a failed encrypt or decrypt is observed only as
//! `PromiseStatus::Failed`.

use std::fmt;

use thiserror::Error;

use crate::promise::PromiseHandle;
use crate::recipient::RecipientHandle;
use crate::session::SessionState;

/// Failures of the Session Manager lifecycle calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// `startup` was called on a session that is already running.
    #[error("session already started")]
    AlreadyStarted,

    /// The call requires a started session.
    #[error("session not started")]
    NotStarted,

    /// The call is not valid from the current lifecycle state.
    #[error("invalid state for {operation}: session is {state:?}")]
    InvalidState {
        /// State the session was in when the call was rejected.
        state: SessionState,
        /// Name of the rejected operation.
        operation: &'static str,
    },

    /// The key server refused the request or could not be reached.
    #[error("key server rejected request: {0}")]
    ServerRejected(String),

    /// An account with this name is already registered.
    #[error("account already exists: {0}")]
    AccountExists(String),
}

/// Either kind of handle the registry layer hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnyHandle {
    /// A promise handle.
    Promise(PromiseHandle),
    /// A resolved recipient handle.
    Recipient(RecipientHandle),
}

impl fmt::Display for AnyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Promise(handle) => handle.fmt(f),
            Self::Recipient(handle) => handle.fmt(f),
        }
    }
}

impl From<PromiseHandle> for AnyHandle {
    fn from(handle: PromiseHandle) -> Self {
        Self::Promise(handle)
    }
}

impl From<RecipientHandle> for AnyHandle {
    fn from(handle: RecipientHandle) -> Self {
        Self::Recipient(handle)
    }
}

/// Failures of Promise Registry calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The handle was never issued or has already been concluded/released.
    #[error("unknown handle: {0}")]
    UnknownHandle(AnyHandle),

    /// The operation behind the handle has not settled yet.
    #[error("result not ready: {0}")]
    NotReady(PromiseHandle),

    /// The operation settled without producing data.
    #[error("operation failed: {0}")]
    OperationFailed(PromiseHandle),
}

/// Failures reported by a key directory implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// The key server could not be reached.
    #[error("key server unreachable: {0}")]
    Unreachable(String),

    /// No account with this name exists.
    #[error("unknown account: {0}")]
    UnknownAccount(String),

    /// An account with this name is already registered.
    #[error("account already exists: {0}")]
    AccountExists(String),

    /// The account name is not acceptable to the server.
    #[error("invalid account name")]
    InvalidName,
}

/// Failures inside a cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CipherError {
    /// The blob is truncated or does not carry the expected header.
    #[error("malformed cipher blob")]
    Malformed,

    /// The key needed to open the blob is not held by this session.
    #[error("key unavailable")]
    KeyUnavailable,

    /// A tag check failed: wrong key, wrong password, or tampered bytes.
    #[error("authentication failed")]
    Authentication,

    /// Sealing failed inside the AEAD primitive.
    #[error("encryption failed")]
    Encryption,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivation,

    /// The system's random number generator failed to produce bytes.
    #[error("randomness source failed")]
    Randomness,
}

/// Crate-wide error returned by calls that span components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HelixError {
    /// Session lifecycle failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Promise registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The engine was built outside a tokio runtime.
    #[error("no async runtime available: {0}")]
    Runtime(String),
}

impl From<DirectoryError> for SessionError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::AccountExists(name) => Self::AccountExists(name),
            other => Self::ServerRejected(other.to_string()),
        }
    }
}
