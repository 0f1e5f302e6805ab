//! Key server collaborator.
//!
//! The key server resolves account names to public keys and authenticates
//! logins. Its wire protocol is not part of this crate: everything the
//! client needs from it is the [`KeyDirectory`] trait. [`MemoryDirectory`]
//! is an in-process implementation used by the demo binary and the tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use x25519_dalek::PublicKey;

use crate::error::DirectoryError;
use crate::keys::RecipientKey;

/// Stable, directory-assigned account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecipientId(pub u64);

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Address of a key server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// What the directory knows about one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Account name.
    pub name: String,
    /// Public identity used to seal envelopes for the account.
    pub key: RecipientKey,
}

/// Contract the session requires from a key server.
///
/// Implementations must be thread-safe: lookups run on the blocking pool
/// while lifecycle calls run on the caller's thread.
pub trait KeyDirectory: Send + Sync {
    /// Open the transport to the server at `endpoint`.
    fn connect(&self, endpoint: &Endpoint) -> Result<(), DirectoryError>;

    /// Register a new account with its public key.
    fn register(&self, name: &str, public: PublicKey) -> Result<RecipientId, DirectoryError>;

    /// Remove an account. Returns `false` if no such account existed.
    fn remove(&self, name: &str) -> Result<bool, DirectoryError>;

    /// Resolve a name to its published key.
    fn lookup(&self, name: &str) -> Result<Option<DirectoryEntry>, DirectoryError>;

    /// Authenticate a login for `name`.
    fn authenticate(&self, name: &str) -> Result<RecipientId, DirectoryError>;
}

// ---------------------------------------------------------------------------
// In-process directory
// ---------------------------------------------------------------------------

/// Thread-safe in-memory key directory.
#[derive(Debug)]
pub struct MemoryDirectory {
    accounts: Mutex<HashMap<String, RecipientKey>>,
    next_id: AtomicU64,
    offline: AtomicBool,
    lookup_latency: Mutex<Option<Duration>>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    /// An empty, reachable directory.
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            offline: AtomicBool::new(false),
            lookup_latency: Mutex::new(None),
        }
    }

    /// Simulate an unreachable server. Every call fails while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every lookup by `latency`.
    pub fn set_lookup_latency(&self, latency: Option<Duration>) {
        *lock(&self.lookup_latency) = latency;
    }

    /// Number of registered accounts.
    pub fn account_count(&self) -> usize {
        lock(&self.accounts).len()
    }

    fn reachable(&self) -> Result<(), DirectoryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unreachable("directory offline".into()));
        }
        Ok(())
    }
}

impl KeyDirectory for MemoryDirectory {
    fn connect(&self, endpoint: &Endpoint) -> Result<(), DirectoryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unreachable(endpoint.to_string()));
        }
        Ok(())
    }

    fn register(&self, name: &str, public: PublicKey) -> Result<RecipientId, DirectoryError> {
        self.reachable()?;
        if name.trim().is_empty() {
            return Err(DirectoryError::InvalidName);
        }
        let mut accounts = lock(&self.accounts);
        if accounts.contains_key(name) {
            return Err(DirectoryError::AccountExists(name.to_string()));
        }
        let id = RecipientId(self.next_id.fetch_add(1, Ordering::SeqCst));
        accounts.insert(name.to_string(), RecipientKey { id, public });
        Ok(id)
    }

    fn remove(&self, name: &str) -> Result<bool, DirectoryError> {
        self.reachable()?;
        Ok(lock(&self.accounts).remove(name).is_some())
    }

    fn lookup(&self, name: &str) -> Result<Option<DirectoryEntry>, DirectoryError> {
        self.reachable()?;
        let latency = *lock(&self.lookup_latency);
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
        Ok(lock(&self.accounts)
            .get(name)
            .map(|key| DirectoryEntry { name: name.to_string(), key: *key }))
    }

    fn authenticate(&self, name: &str) -> Result<RecipientId, DirectoryError> {
        self.reachable()?;
        lock(&self.accounts)
            .get(name)
            .map(|key| key.id)
            .ok_or_else(|| DirectoryError::UnknownAccount(name.to_string()))
    }
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::AccountSecret;

    fn public() -> PublicKey {
        AccountSecret::generate().unwrap().public_key()
    }

    #[test]
    fn ids_are_assigned_monotonically() {
        let dir = MemoryDirectory::new();
        let a = dir.register("alice", public()).unwrap();
        let b = dir.register("bob", public()).unwrap();
        assert!(b > a);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let dir = MemoryDirectory::new();
        dir.register("alice", public()).unwrap();
        assert_eq!(
            dir.register("alice", public()),
            Err(DirectoryError::AccountExists("alice".into()))
        );
    }

    #[test]
    fn remove_reports_absence_without_error() {
        let dir = MemoryDirectory::new();
        assert_eq!(dir.remove("ghost"), Ok(false));
        dir.register("ghost", public()).unwrap();
        assert_eq!(dir.remove("ghost"), Ok(true));
    }

    #[test]
    fn offline_directory_fails_every_call() {
        let dir = MemoryDirectory::new();
        dir.set_offline(true);
        let endpoint = Endpoint { host: "127.0.0.1".into(), port: 8886 };
        assert!(matches!(dir.connect(&endpoint), Err(DirectoryError::Unreachable(_))));
        assert!(matches!(dir.lookup("alice"), Err(DirectoryError::Unreachable(_))));
    }
}
