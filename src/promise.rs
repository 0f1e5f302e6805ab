//! Promise registry.
//!
//! Every asynchronous operation (lookup, encrypt, decrypt) is tracked by a
//! [`PromiseHandle`]. The operation itself runs on the tokio runtime the
//! registry was built with; callers observe it only through the handle.
//!
//! Each record's state lives in a `watch` channel. The worker settles it
//! exactly once with `send_if_modified`, and every task suspended in
//! [`PromiseRegistry::wait`] on that handle wakes up together.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::directory::lock;
use crate::error::RegistryError;
use crate::journal::{JournalEvent, SharedJournal};

/// Opaque reference to an in-flight or settled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PromiseHandle(u64);

impl PromiseHandle {
    /// The raw handle value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PromiseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise#{}", self.0)
    }
}

/// What kind of operation a promise tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromiseKind {
    /// Recipient lookup.
    Lookup,
    /// Envelope encryption.
    Encrypt,
    /// Envelope decryption.
    Decrypt,
}

/// Observable state of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromiseStatus {
    /// Not settled yet.
    Pending,
    /// Settled with a payload, readable via `get_result`.
    DataAvailable,
    /// Settled without a payload.
    Failed,
    /// The operation's own deadline elapsed before it completed.
    TimedOut,
    /// Unknown handle, or the session went away while the operation was pending.
    Invalid,
}

impl PromiseStatus {
    /// Returns true for every status other than `Pending`.
    pub fn is_settled(self) -> bool {
        self != Self::Pending
    }
}

/// How long [`PromiseRegistry::wait`] may suspend, or how long a lookup may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeout {
    /// Give up after this many milliseconds.
    Millis(u64),
    /// No deadline.
    Infinite,
}

impl Timeout {
    /// The bound as a `Duration`, or `None` when infinite.
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Millis(ms) => Some(Duration::from_millis(ms)),
            Self::Infinite => None,
        }
    }
}

/// How an operation finished. Produced by the work handed to `begin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Completed with a payload.
    Data(Vec<u8>),
    /// Completed without a payload.
    Failed,
    /// Ran past its own deadline.
    TimedOut,
}

#[derive(Debug)]
enum State {
    Pending,
    DataAvailable(Vec<u8>),
    Failed,
    TimedOut,
    Invalid,
}

impl State {
    fn status(&self) -> PromiseStatus {
        match self {
            Self::Pending => PromiseStatus::Pending,
            Self::DataAvailable(_) => PromiseStatus::DataAvailable,
            Self::Failed => PromiseStatus::Failed,
            Self::TimedOut => PromiseStatus::TimedOut,
            Self::Invalid => PromiseStatus::Invalid,
        }
    }
}

impl From<Settlement> for State {
    fn from(settlement: Settlement) -> Self {
        match settlement {
            Settlement::Data(bytes) => Self::DataAvailable(bytes),
            Settlement::Failed => Self::Failed,
            Settlement::TimedOut => Self::TimedOut,
        }
    }
}

struct Record {
    kind: PromiseKind,
    state: Arc<watch::Sender<State>>,
}

struct Inner {
    records: Mutex<HashMap<PromiseHandle, Record>>,
    next: AtomicU64,
    runtime: Handle,
    journal: SharedJournal,
}

/// Issues handles for asynchronous operations and tracks their state.
///
/// Cheap to clone; clones share the same records.
#[derive(Clone)]
pub struct PromiseRegistry {
    inner: Arc<Inner>,
}

impl fmt::Debug for PromiseRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseRegistry").field("records", &self.len()).finish()
    }
}

impl PromiseRegistry {
    /// Create a registry that runs operations on `runtime`.
    pub fn new(runtime: Handle, journal: SharedJournal) -> Self {
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(HashMap::new()),
                next: AtomicU64::new(1),
                runtime,
                journal,
            }),
        }
    }

    /// Start an operation. Never blocks; the handle starts out `Pending`.
    pub fn begin<F>(&self, kind: PromiseKind, work: F) -> PromiseHandle
    where
        F: Future<Output = Settlement> + Send + 'static,
    {
        self.begin_or_else(kind, work, |_| {})
    }

    /// Like [`begin`](Self::begin), but hands the settlement to `discarded`
    /// when it arrives after the promise was concluded or invalidated.
    ///
    /// Work that acquires something on behalf of its result uses this to
    /// give it back.
    pub fn begin_or_else<F, D>(&self, kind: PromiseKind, work: F, discarded: D) -> PromiseHandle
    where
        F: Future<Output = Settlement> + Send + 'static,
        D: FnOnce(Settlement) + Send + 'static,
    {
        let handle = PromiseHandle(self.inner.next.fetch_add(1, Ordering::Relaxed));
        let (tx, _) = watch::channel(State::Pending);
        let tx = Arc::new(tx);
        lock(&self.inner.records).insert(handle, Record { kind, state: Arc::clone(&tx) });
        debug!(%handle, ?kind, "operation started");

        let journal = self.inner.journal.clone();
        self.inner.runtime.spawn(async move {
            let settlement = work.await;
            if let Some(lost) = settle(&tx, handle, kind, settlement, &journal) {
                discarded(lost);
            }
        });
        handle
    }

    /// Start an operation whose work is CPU-bound or blocking.
    ///
    /// The closure runs on the runtime's blocking pool. A panic inside it
    /// settles the promise as `Failed`.
    pub fn begin_blocking<F>(&self, kind: PromiseKind, work: F) -> PromiseHandle
    where
        F: FnOnce() -> Settlement + Send + 'static,
    {
        let runtime = self.inner.runtime.clone();
        self.begin(kind, async move {
            runtime.spawn_blocking(work).await.unwrap_or(Settlement::Failed)
        })
    }

    /// Suspend until the promise settles or `timeout` elapses.
    ///
    /// Returns the settled status, or the current one (`Pending`) when the
    /// timeout wins. A timed-out wait does not cancel the operation; a late
    /// result remains retrievable. Calling this again after settlement
    /// returns the same status.
    pub async fn wait(&self, handle: PromiseHandle, timeout: Timeout) -> Result<PromiseStatus, RegistryError> {
        let mut rx = self.subscribe(handle)?;

        let outcome = {
            let settled = rx.wait_for(|state| state.status().is_settled());
            match timeout.as_duration() {
                None => Some(settled.await.map(|state| state.status())),
                Some(limit) => tokio::time::timeout(limit, settled)
                    .await
                    .ok()
                    .map(|result| result.map(|state| state.status())),
            }
        };

        match outcome {
            Some(result) => result.map_err(|_| RegistryError::UnknownHandle(handle.into())),
            None => Ok(rx.borrow().status()),
        }
    }

    /// Current status without blocking. Unknown handles report `Invalid`.
    pub fn peek_status(&self, handle: PromiseHandle) -> PromiseStatus {
        match self.sender(handle) {
            Ok(state) => state.borrow().status(),
            Err(_) => PromiseStatus::Invalid,
        }
    }

    /// Copy out the payload of a settled promise.
    pub fn get_result(&self, handle: PromiseHandle) -> Result<Vec<u8>, RegistryError> {
        let state = self.sender(handle)?;
        let current = state.borrow();
        match &*current {
            State::Pending => Err(RegistryError::NotReady(handle)),
            State::DataAvailable(bytes) => Ok(bytes.clone()),
            State::Failed | State::TimedOut | State::Invalid => Err(RegistryError::OperationFailed(handle)),
        }
    }

    /// Release a record. Later calls with `handle` fail with `UnknownHandle`.
    ///
    /// Concluding a pending promise is allowed; its eventual result is dropped.
    pub fn conclude(&self, handle: PromiseHandle) -> Result<(), RegistryError> {
        let removed = lock(&self.inner.records).remove(&handle);
        match removed {
            Some(record) => {
                // Close the record so in-flight work cannot land a result.
                close_pending(&record.state);
                debug!(%handle, kind = ?record.kind, "promise concluded");
                Ok(())
            },
            None => Err(RegistryError::UnknownHandle(handle.into())),
        }
    }

    /// The kind of operation behind `handle`, if it is still registered.
    pub fn kind(&self, handle: PromiseHandle) -> Option<PromiseKind> {
        lock(&self.inner.records).get(&handle).map(|record| record.kind)
    }

    /// Mark every still-pending promise `Invalid`. Returns how many changed.
    ///
    /// The underlying work is not cancelled; its result is discarded.
    pub fn invalidate_pending(&self) -> usize {
        let senders: Vec<_> = lock(&self.inner.records)
            .values()
            .map(|record| Arc::clone(&record.state))
            .collect();

        let invalidated = senders.iter().filter(|state| close_pending(state)).count();

        if invalidated > 0 {
            warn!(invalidated, "pending promises invalidated");
        }
        invalidated
    }

    /// Number of registered (not yet concluded) promises.
    pub fn len(&self) -> usize {
        lock(&self.inner.records).len()
    }

    /// Returns true if no promise is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sender(&self, handle: PromiseHandle) -> Result<Arc<watch::Sender<State>>, RegistryError> {
        lock(&self.inner.records)
            .get(&handle)
            .map(|record| Arc::clone(&record.state))
            .ok_or(RegistryError::UnknownHandle(handle.into()))
    }

    fn subscribe(&self, handle: PromiseHandle) -> Result<watch::Receiver<State>, RegistryError> {
        self.sender(handle).map(|state| state.subscribe())
    }
}

/// Mark a pending record `Invalid`. Returns true if it was pending.
fn close_pending(state: &watch::Sender<State>) -> bool {
    state.send_if_modified(|current| {
        if matches!(current, State::Pending) {
            *current = State::Invalid;
            true
        } else {
            false
        }
    })
}

/// Move a record out of `Pending`.
///
/// Returns the settlement back when the record had already left `Pending`.
fn settle(
    state: &watch::Sender<State>,
    handle: PromiseHandle,
    kind: PromiseKind,
    settlement: Settlement,
    journal: &SharedJournal,
) -> Option<Settlement> {
    let mut pending = Some(settlement);
    let mut settled = None;
    state.send_if_modified(|current| {
        if !matches!(current, State::Pending) {
            return false;
        }
        match pending.take() {
            Some(settlement) => {
                *current = State::from(settlement);
                settled = Some(current.status());
                true
            },
            None => false,
        }
    });

    match settled {
        Some(status) => {
            debug!(%handle, ?kind, ?status, "promise settled");
            lock(journal).append(JournalEvent::PromiseSettled { handle, kind, status });
        },
        None => debug!(%handle, ?kind, "late result discarded"),
    }
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Journal;

    fn registry() -> PromiseRegistry {
        PromiseRegistry::new(Handle::current(), Journal::shared())
    }

    #[tokio::test]
    async fn settles_exactly_once() {
        let registry = registry();
        let handle = registry.begin(PromiseKind::Encrypt, async { Settlement::Data(vec![1, 2, 3]) });
        assert_eq!(registry.wait(handle, Timeout::Infinite).await, Ok(PromiseStatus::DataAvailable));

        let state = registry.sender(handle).unwrap();
        let lost = settle(&state, handle, PromiseKind::Encrypt, Settlement::Failed, &Journal::shared());
        assert_eq!(lost, Some(Settlement::Failed));
        assert_eq!(registry.peek_status(handle), PromiseStatus::DataAvailable);
        assert_eq!(registry.get_result(handle), Ok(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn pending_result_is_not_ready() {
        let registry = registry();
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let handle = registry.begin(PromiseKind::Lookup, async move {
            let _ = gate.await;
            Settlement::Failed
        });
        assert_eq!(registry.get_result(handle), Err(RegistryError::NotReady(handle)));
        release.send(()).unwrap();
        assert_eq!(registry.wait(handle, Timeout::Infinite).await, Ok(PromiseStatus::Failed));
        assert_eq!(registry.get_result(handle), Err(RegistryError::OperationFailed(handle)));
    }

    #[tokio::test]
    async fn invalidation_discards_late_result() {
        let registry = registry();
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let handle = registry.begin(PromiseKind::Decrypt, async move {
            let _ = gate.await;
            Settlement::Data(b"late".to_vec())
        });
        assert_eq!(registry.invalidate_pending(), 1);
        release.send(()).unwrap();
        assert_eq!(registry.wait(handle, Timeout::Infinite).await, Ok(PromiseStatus::Invalid));
        tokio::task::yield_now().await;
        assert_eq!(registry.peek_status(handle), PromiseStatus::Invalid);
    }

    #[tokio::test]
    async fn concluded_work_hands_back_its_result() {
        let registry = registry();
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let (returned_tx, returned_rx) = tokio::sync::oneshot::channel();
        let handle = registry.begin_or_else(
            PromiseKind::Lookup,
            async move {
                let _ = gate.await;
                Settlement::Data(vec![4, 2])
            },
            move |lost| {
                let _ = returned_tx.send(lost);
            },
        );
        registry.conclude(handle).unwrap();
        release.send(()).unwrap();
        assert_eq!(returned_rx.await.unwrap(), Settlement::Data(vec![4, 2]));
    }

    #[tokio::test]
    async fn unknown_handle_peeks_invalid() {
        let registry = registry();
        assert_eq!(registry.peek_status(PromiseHandle(999)), PromiseStatus::Invalid);
        assert_eq!(registry.kind(PromiseHandle(999)), None);
    }
}
