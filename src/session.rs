//! Session lifecycle.
//!
//! ```text
//! Uninitialized -> Started -> Connected -> AccountReady -> LoggedIn -> Disconnected -> ShutDown
//! ```
//!
//! Every lifecycle call takes the session lock for its whole duration, so
//! concurrent callers are serialized. A call that is not valid from the
//! current state fails without touching the state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::directory::{lock, Endpoint, KeyDirectory, RecipientId};
use crate::error::SessionError;
use crate::journal::{JournalEvent, Lifecycle, SharedJournal};
use crate::keys::{AccountSecret, Keyring, LocalIdentity};
use crate::promise::PromiseRegistry;

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// `startup` has not been called.
    Uninitialized,
    /// Engine is up, no server connection yet.
    Started,
    /// Connected to the key server.
    Connected,
    /// An account was provisioned in this session.
    AccountReady,
    /// Logged in; lookups and cipher operations are allowed.
    LoggedIn,
    /// Server connection closed.
    Disconnected,
    /// Resources released. Terminal.
    ShutDown,
}

impl SessionState {
    fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::AccountReady | Self::LoggedIn)
    }
}

#[derive(Debug)]
struct Session {
    state: SessionState,
    endpoint: Option<Endpoint>,
    flags: u64,
    account: Option<(String, RecipientId)>,
    provisioned: HashMap<String, RecipientId>,
    keyring: Keyring,
}

impl Session {
    fn require(&self, allowed: &[SessionState], operation: &'static str) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState { state: self.state, operation })
        }
    }

    fn require_connected(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.state.is_connected() {
            Ok(())
        } else {
            Err(SessionError::InvalidState { state: self.state, operation })
        }
    }
}

/// Owns the single session and serializes its lifecycle calls.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    session: Arc<Mutex<Session>>,
    directory: Arc<dyn KeyDirectory>,
    registry: PromiseRegistry,
    journal: SharedJournal,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").field("state", &self.state()).finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create an uninitialized session talking to `directory`.
    pub fn new(directory: Arc<dyn KeyDirectory>, registry: PromiseRegistry, journal: SharedJournal) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session {
                state: SessionState::Uninitialized,
                endpoint: None,
                flags: 0,
                account: None,
                provisioned: HashMap::new(),
                keyring: Keyring::default(),
            })),
            directory,
            registry,
            journal,
        }
    }

    /// Bring the engine up for the key server at `server_address:port`.
    pub fn startup(&self, server_address: &str, port: u16, flags: u64) -> Result<(), SessionError> {
        self.journaled(Lifecycle::Startup, |session| {
            match session.state {
                SessionState::Uninitialized => {},
                SessionState::ShutDown => {
                    return Err(SessionError::InvalidState { state: session.state, operation: "startup" })
                },
                _ => return Err(SessionError::AlreadyStarted),
            }
            session.endpoint = Some(Endpoint { host: server_address.to_string(), port });
            session.flags = flags;
            session.state = SessionState::Started;
            info!(server = %server_address, port, flags, "session started");
            Ok(())
        })
    }

    /// Open the connection to the key server.
    pub fn connect(&self) -> Result<(), SessionError> {
        self.journaled(Lifecycle::Connect, |session| {
            match session.state {
                SessionState::Started => {},
                SessionState::Uninitialized | SessionState::ShutDown => return Err(SessionError::NotStarted),
                state => return Err(SessionError::InvalidState { state, operation: "connect" }),
            }
            let endpoint = session.endpoint.as_ref().ok_or(SessionError::NotStarted)?;
            self.directory.connect(endpoint)?;
            info!(%endpoint, flags = session.flags, "connected to key server");
            session.state = SessionState::Connected;
            Ok(())
        })
    }

    /// Remove an account from the key server and forget its local secret.
    ///
    /// Absence of the account is not an error.
    pub fn delete_account(&self, name: &str) -> Result<(), SessionError> {
        self.journaled(Lifecycle::DeleteAccount, |session| {
            session.require_connected("delete_account")?;
            if session.account.as_ref().is_some_and(|(current, _)| current == name) {
                return Err(SessionError::InvalidState { state: session.state, operation: "delete_account" });
            }
            let existed = self.directory.remove(name)?;
            if let Some(id) = session.provisioned.remove(name) {
                session.keyring.remove(id);
            }
            info!(account = name, existed, "account deleted");
            Ok(())
        })
    }

    /// Provision a new account: generate its key pair locally and publish
    /// the public half.
    pub fn create_account(&self, name: &str) -> Result<(), SessionError> {
        self.journaled(Lifecycle::CreateAccount, |session| {
            session.require_connected("create_account")?;
            let secret = AccountSecret::generate()
                .map_err(|err| SessionError::ServerRejected(format!("key generation: {err}")))?;
            let id = self.directory.register(name, secret.public_key())?;
            session.keyring.insert(id, secret);
            session.provisioned.insert(name.to_string(), id);
            if session.state == SessionState::Connected {
                session.state = SessionState::AccountReady;
            }
            info!(account = name, %id, "account created");
            Ok(())
        })
    }

    /// Log in as `name`. The account secret must be held locally.
    pub fn login(&self, name: &str) -> Result<(), SessionError> {
        self.journaled(Lifecycle::Login, |session| {
            session.require(&[SessionState::Connected, SessionState::AccountReady], "login")?;
            let id = self.directory.authenticate(name)?;
            if session.keyring.get(id).is_none() {
                return Err(SessionError::ServerRejected(format!("no local key for account {name}")));
            }
            session.account = Some((name.to_string(), id));
            session.state = SessionState::LoggedIn;
            info!(account = name, %id, "logged in");
            Ok(())
        })
    }

    /// Whether the session currently holds a server connection.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Close the server connection. Outstanding promises become `Invalid`
    /// but their work is not cancelled.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.journaled(Lifecycle::Disconnect, |session| {
            session.require_connected("disconnect")?;
            let invalidated = self.registry.invalidate_pending();
            session.account = None;
            session.state = SessionState::Disconnected;
            info!(invalidated, "disconnected from key server");
            Ok(())
        })
    }

    /// Release every process-wide resource. Terminal.
    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.journaled(Lifecycle::Shutdown, |session| {
            session.require(&[SessionState::Disconnected], "shutdown")?;
            session.keyring.clear();
            session.provisioned.clear();
            session.endpoint = None;
            session.flags = 0;
            session.state = SessionState::ShutDown;
            info!("session shut down");
            Ok(())
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        lock(&self.session).state
    }

    /// Flags passed to `startup`. Zero before startup and after shutdown.
    pub fn flags(&self) -> u64 {
        lock(&self.session).flags
    }

    /// Name of the logged-in account.
    pub fn account(&self) -> Option<String> {
        lock(&self.session).account.as_ref().map(|(name, _)| name.clone())
    }

    /// Fail unless lookups and cipher operations are allowed.
    pub(crate) fn require_logged_in(&self, operation: &'static str) -> Result<(), SessionError> {
        lock(&self.session).require(&[SessionState::LoggedIn], operation)
    }

    /// The logged-in account and its secret.
    pub(crate) fn local_identity(&self, operation: &'static str) -> Result<LocalIdentity, SessionError> {
        let session = lock(&self.session);
        session.require(&[SessionState::LoggedIn], operation)?;
        let invalid = || SessionError::InvalidState { state: session.state, operation };
        let (_, id) = session.account.as_ref().ok_or_else(invalid)?;
        let secret = session.keyring.get(*id).ok_or_else(invalid)?;
        Ok(LocalIdentity { id: *id, secret })
    }

    pub(crate) fn directory(&self) -> Arc<dyn KeyDirectory> {
        Arc::clone(&self.directory)
    }

    fn journaled<T>(
        &self,
        call: Lifecycle,
        step: impl FnOnce(&mut Session) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let result = {
            let mut session = lock(&self.session);
            step(&mut session)
        };
        if let Err(err) = &result {
            warn!(?call, %err, "lifecycle call failed");
        }
        lock(&self.journal).append(JournalEvent::Lifecycle {
            call,
            ok: result.is_ok(),
            detail: result.as_ref().err().map(ToString::to_string),
        });
        result
    }
}
