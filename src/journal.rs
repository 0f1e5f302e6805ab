//! Append-only operation journal.
//!
//! Records every session lifecycle call and every promise settlement.
//! Supports pluggable sinks for forwarding records to files or other stores.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::promise::{PromiseHandle, PromiseKind, PromiseStatus};

/// Journal shared between the session and the promise registry.
pub type SharedJournal = Arc<Mutex<Journal>>;

/// A sink that receives journal records.
pub trait JournalSink: Send {
    /// Append a record. Called for every journal entry.
    fn append(&mut self, record: &JournalRecord);
}

/// Session lifecycle calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Startup,
    Connect,
    DeleteAccount,
    CreateAccount,
    Login,
    Disconnect,
    Shutdown,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    /// A lifecycle call returned.
    Lifecycle {
        /// Which call.
        call: Lifecycle,
        /// Whether it succeeded.
        ok: bool,
        /// Error text on failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// A promise left `Pending`.
    PromiseSettled {
        /// The settled promise.
        handle: PromiseHandle,
        /// Its operation kind.
        kind: PromiseKind,
        /// The terminal status.
        status: PromiseStatus,
    },
}

/// A timestamped journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    /// The event.
    #[serde(flatten)]
    pub event: JournalEvent,
    /// When it was recorded.
    pub timestamp: DateTime<Utc>,
}

/// In-memory journal with optional forward sinks.
#[derive(Default)]
pub struct Journal {
    records: Vec<JournalRecord>,
    forward_sinks: Vec<Box<dyn JournalSink>>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("records", &self.records)
            .field("forward_sinks", &self.forward_sinks.len())
            .finish()
    }
}

impl Journal {
    /// An empty journal behind a shared lock.
    pub fn shared() -> SharedJournal {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Add a sink to receive every subsequent record.
    pub fn add_forward_sink(&mut self, sink: Box<dyn JournalSink>) {
        self.forward_sinks.push(sink);
    }

    /// Timestamp `event`, forward it, and keep it.
    pub fn append(&mut self, event: JournalEvent) {
        let record = JournalRecord { event, timestamp: Utc::now() };
        for sink in &mut self.forward_sinks {
            sink.append(&record);
        }
        self.records.push(record);
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over the records in append order.
    pub fn iter(&self) -> std::slice::Iter<'_, JournalRecord> {
        self.records.iter()
    }
}

// ---------------------------------------------------------------------------
// Built-in sink: file
// ---------------------------------------------------------------------------

/// Writes records as JSON lines to a file, appending if it exists.
pub struct FileJournalSink {
    file: std::fs::File,
}

impl FileJournalSink {
    /// Open or create `path` for appending.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl JournalSink for FileJournalSink {
    fn append(&mut self, record: &JournalRecord) {
        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(err) = writeln!(self.file, "{line}").and_then(|()| self.file.flush()) {
                    tracing::warn!(%err, "journal sink write failed");
                }
            },
            Err(err) => tracing::warn!(%err, "journal record not serializable"),
        }
    }
}
