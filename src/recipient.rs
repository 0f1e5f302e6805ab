//! Recipient directory client.
//!
//! Resolves an account name to a [`RecipientHandle`] through the key
//! directory as a `Lookup` promise. A resolved handle stays valid until it
//! is released; resolving the same account again hands back the same handle
//! and takes another reference on it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::directory::{lock, DirectoryEntry, RecipientId};
use crate::error::{HelixError, RegistryError};
use crate::keys::RecipientKey;
use crate::promise::{PromiseHandle, PromiseKind, PromiseRegistry, Settlement, Timeout};
use crate::session::SessionManager;

/// Opaque, process-stable reference to a resolved recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecipientHandle(u64);

impl RecipientHandle {
    /// The raw handle value.
    pub fn get(self) -> u64 {
        self.0
    }

    fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = bytes.try_into().ok()?;
        Some(Self(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for RecipientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recipient#{}", self.0)
    }
}

/// A recipient as resolved from the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRecipient {
    /// Account name.
    pub name: String,
    /// Public identity to seal for.
    pub key: RecipientKey,
}

struct Entry {
    recipient: ResolvedRecipient,
    refs: usize,
}

#[derive(Default)]
struct Table {
    entries: HashMap<RecipientHandle, Entry>,
    by_id: HashMap<RecipientId, RecipientHandle>,
}

impl Table {
    fn acquire(&mut self, next: &AtomicU64, entry: DirectoryEntry) -> RecipientHandle {
        if let Some(handle) = self.by_id.get(&entry.key.id).copied() {
            if let Some(existing) = self.entries.get_mut(&handle) {
                existing.refs += 1;
                existing.recipient = ResolvedRecipient { name: entry.name, key: entry.key };
                return handle;
            }
        }
        let handle = RecipientHandle(next.fetch_add(1, Ordering::Relaxed));
        self.by_id.insert(entry.key.id, handle);
        self.entries.insert(
            handle,
            Entry { recipient: ResolvedRecipient { name: entry.name, key: entry.key }, refs: 1 },
        );
        handle
    }

    /// Drop one reference. Returns false for an unknown handle.
    fn release(&mut self, handle: RecipientHandle) -> bool {
        let Some(entry) = self.entries.get_mut(&handle) else {
            return false;
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            let id = entry.recipient.key.id;
            self.entries.remove(&handle);
            self.by_id.remove(&id);
            debug!(%handle, "recipient released");
        }
        true
    }
}

/// Resolves names to recipients and owns the resolved-handle table.
#[derive(Clone)]
pub struct RecipientDirectory {
    session: SessionManager,
    registry: PromiseRegistry,
    table: Arc<Mutex<Table>>,
    next: Arc<AtomicU64>,
}

impl fmt::Debug for RecipientDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecipientDirectory")
            .field("resolved", &lock(&self.table).entries.len())
            .finish_non_exhaustive()
    }
}

impl RecipientDirectory {
    /// Create a client bound to `session`, issuing lookups into `registry`.
    pub fn new(session: SessionManager, registry: PromiseRegistry) -> Self {
        Self {
            session,
            registry,
            table: Arc::new(Mutex::new(Table::default())),
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Start resolving `name`. Requires a logged-in session.
    ///
    /// The promise settles with the encoded [`RecipientHandle`] (read it with
    /// [`RecipientDirectory::recipient`]), or `Failed` when no matching
    /// account was found within `timeout`.
    ///
    /// A lookup concluded or invalidated before it lands takes no reference.
    pub fn resolve_recipient(&self, name: &str, timeout: Timeout) -> Result<PromiseHandle, HelixError> {
        self.session.require_logged_in("resolve_recipient")?;

        let directory = self.session.directory();
        let table = Arc::clone(&self.table);
        let discard_table = Arc::clone(&self.table);
        let next = Arc::clone(&self.next);
        let name = name.to_string();

        let work = async move {
            let query = name.clone();
            let lookup = tokio::task::spawn_blocking(move || directory.lookup(&query));
            let joined = match timeout.as_duration() {
                Some(limit) => match tokio::time::timeout(limit, lookup).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        debug!(recipient = %name, "no answer before lookup deadline");
                        return Settlement::Failed;
                    },
                },
                None => lookup.await,
            };

            match joined {
                Ok(Ok(Some(entry))) => {
                    let handle = lock(&table).acquire(&next, entry);
                    debug!(recipient = %name, %handle, "recipient resolved");
                    Settlement::Data(handle.to_bytes().to_vec())
                },
                Ok(Ok(None)) => {
                    debug!(recipient = %name, "unknown recipient");
                    Settlement::Failed
                },
                Ok(Err(err)) => {
                    warn!(recipient = %name, %err, "lookup failed");
                    Settlement::Failed
                },
                Err(err) => {
                    warn!(recipient = %name, %err, "lookup task aborted");
                    Settlement::Failed
                },
            }
        };

        Ok(self.registry.begin_or_else(PromiseKind::Lookup, work, move |lost| {
            if let Settlement::Data(bytes) = lost {
                if let Some(handle) = RecipientHandle::from_bytes(&bytes) {
                    lock(&discard_table).release(handle);
                }
            }
        }))
    }

    /// Decode the recipient handle produced by a settled lookup promise.
    pub fn recipient(&self, lookup: PromiseHandle) -> Result<RecipientHandle, RegistryError> {
        if self.registry.kind(lookup).is_some_and(|kind| kind != PromiseKind::Lookup) {
            return Err(RegistryError::OperationFailed(lookup));
        }
        let bytes = self.registry.get_result(lookup)?;
        RecipientHandle::from_bytes(&bytes).ok_or(RegistryError::OperationFailed(lookup))
    }

    /// Details of a resolved recipient.
    pub fn resolved(&self, handle: RecipientHandle) -> Result<ResolvedRecipient, RegistryError> {
        lock(&self.table)
            .entries
            .get(&handle)
            .map(|entry| entry.recipient.clone())
            .ok_or(RegistryError::UnknownHandle(handle.into()))
    }

    /// Drop one reference to `handle`. The last release forgets the recipient.
    pub fn release(&self, handle: RecipientHandle) -> Result<(), RegistryError> {
        if lock(&self.table).release(handle) {
            Ok(())
        } else {
            Err(RegistryError::UnknownHandle(handle.into()))
        }
    }

    /// Number of recipients currently resolved.
    pub fn resolved_count(&self) -> usize {
        lock(&self.table).entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::AccountSecret;

    fn entry(id: u64, name: &str) -> DirectoryEntry {
        let public = AccountSecret::generate().unwrap().public_key();
        DirectoryEntry { name: name.to_string(), key: RecipientKey { id: RecipientId(id), public } }
    }

    #[test]
    fn same_account_reuses_handle() {
        let next = AtomicU64::new(1);
        let mut table = Table::default();
        let first = table.acquire(&next, entry(5, "alice"));
        let second = table.acquire(&next, entry(5, "alice"));
        let other = table.acquire(&next, entry(6, "bob"));
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(table.entries[&first].refs, 2);

        assert!(table.release(first));
        assert!(table.release(first));
        assert!(!table.release(first));
        assert!(table.by_id.get(&RecipientId(5)).is_none());
    }

    #[test]
    fn handle_bytes_decode() {
        let handle = RecipientHandle(0x0102_0304_0506_0708);
        assert_eq!(RecipientHandle::from_bytes(&handle.to_bytes()), Some(handle));
        assert_eq!(RecipientHandle::from_bytes(&[1, 2, 3]), None);
    }
}
