mod common;

use helix_client::error::SessionError;
use helix_client::journal::{JournalEvent, Lifecycle};
use helix_client::promise::{PromiseStatus, Timeout};
use helix_client::session::SessionState;

#[tokio::test]
async fn full_lifecycle_walks_every_state() {
    let (engine, directory) = common::engine();
    let session = engine.session();

    assert_eq!(session.state(), SessionState::Uninitialized);
    session.startup("10.0.0.5", 8886, 0).unwrap();
    assert_eq!(session.state(), SessionState::Started);
    session.connect().unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    session.delete_account("alice").unwrap();
    session.create_account("alice").unwrap();
    assert_eq!(session.state(), SessionState::AccountReady);
    assert_eq!(directory.account_count(), 1);
    session.login("alice").unwrap();
    assert_eq!(session.state(), SessionState::LoggedIn);
    assert_eq!(session.account().as_deref(), Some("alice"));
    assert!(session.is_connected());

    session.disconnect().unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.is_connected());
    assert_eq!(session.account(), None);

    session.shutdown().unwrap();
    assert_eq!(session.state(), SessionState::ShutDown);
}

#[tokio::test]
async fn out_of_order_calls_leave_state_untouched() {
    let (engine, _) = common::engine();
    let session = engine.session();
    session.startup("10.0.0.5", 8886, 0).unwrap();

    // Login before connect.
    let err = session.login("alice").unwrap_err();
    assert_eq!(err, SessionError::InvalidState { state: SessionState::Started, operation: "login" });
    assert_eq!(session.state(), SessionState::Started);

    // Shutdown while still started.
    assert!(matches!(session.shutdown(), Err(SessionError::InvalidState { .. })));
    assert_eq!(session.state(), SessionState::Started);

    // Account calls need a connection.
    assert!(matches!(session.create_account("alice"), Err(SessionError::InvalidState { .. })));
    assert!(matches!(session.delete_account("alice"), Err(SessionError::InvalidState { .. })));
    assert_eq!(session.state(), SessionState::Started);
}

#[tokio::test]
async fn delete_account_is_idempotent() {
    let (engine, directory) = common::engine();
    let session = engine.session();
    session.startup("10.0.0.5", 8886, 0).unwrap();
    session.connect().unwrap();

    session.delete_account("ghost").unwrap();
    session.delete_account("ghost").unwrap();
    session.create_account("ghost").unwrap();
    session.delete_account("ghost").unwrap();
    assert_eq!(directory.account_count(), 0);
}

#[tokio::test]
async fn create_existing_account_is_rejected() {
    let (engine, _) = common::engine();
    let session = engine.session();
    session.startup("10.0.0.5", 8886, 0).unwrap();
    session.connect().unwrap();
    session.create_account("alice").unwrap();

    assert_eq!(session.create_account("alice"), Err(SessionError::AccountExists("alice".into())));
    assert_eq!(session.state(), SessionState::AccountReady);
}

#[tokio::test]
async fn logged_in_account_cannot_be_deleted() {
    let (engine, directory) = common::logged_in(&["alice"]);
    let session = engine.session();

    assert!(matches!(session.delete_account("alice"), Err(SessionError::InvalidState { .. })));
    assert_eq!(directory.account_count(), 1);
    assert_eq!(session.state(), SessionState::LoggedIn);
}

#[tokio::test]
async fn shutdown_is_terminal() {
    let (engine, _) = common::logged_in(&["alice"]);
    let session = engine.session();
    session.disconnect().unwrap();
    session.shutdown().unwrap();

    assert!(matches!(session.startup("10.0.0.5", 8886, 0), Err(SessionError::InvalidState { .. })));
    assert_eq!(session.connect(), Err(SessionError::NotStarted));
    assert_eq!(session.state(), SessionState::ShutDown);
}

#[tokio::test]
async fn disconnect_invalidates_pending_lookups() {
    let (engine, directory) = common::logged_in(&["alice"]);
    directory.set_lookup_latency(Some(std::time::Duration::from_millis(300)));

    let lookup = engine.recipients().resolve_recipient("alice", Timeout::Infinite).unwrap();
    assert_eq!(engine.registry().peek_status(lookup), PromiseStatus::Pending);

    engine.session().disconnect().unwrap();
    assert_eq!(engine.registry().peek_status(lookup), PromiseStatus::Invalid);

    // The late result is discarded.
    let status = engine.registry().wait(lookup, Timeout::Millis(1_000)).await.unwrap();
    assert_eq!(status, PromiseStatus::Invalid);
}

#[tokio::test]
async fn lifecycle_calls_are_journaled() {
    let (engine, _) = common::engine();
    let session = engine.session();
    session.startup("10.0.0.5", 8886, 0).unwrap();
    let _ = session.login("alice");

    let journal = engine.journal().lock().unwrap();
    let calls: Vec<_> = journal
        .iter()
        .filter_map(|record| match &record.event {
            JournalEvent::Lifecycle { call, ok, .. } => Some((*call, *ok)),
            _ => None,
        })
        .collect();
    assert_eq!(calls, vec![(Lifecycle::Startup, true), (Lifecycle::Login, false)]);
}
