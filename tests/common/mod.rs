#![allow(dead_code)]

use std::sync::Arc;

use helix_client::directory::MemoryDirectory;
use helix_client::Engine;

/// A fresh engine over its own in-memory directory.
pub fn engine() -> (Engine, Arc<MemoryDirectory>) {
    let directory = Arc::new(MemoryDirectory::new());
    let engine = Engine::new(directory.clone()).unwrap();
    (engine, directory)
}

/// Start, connect, provision every name in `accounts`, and log in as the first.
pub fn logged_in(accounts: &[&str]) -> (Engine, Arc<MemoryDirectory>) {
    let (engine, directory) = engine();
    let session = engine.session();
    session.startup("127.0.0.1", 8886, 0).unwrap();
    session.connect().unwrap();
    for name in accounts {
        session.delete_account(name).unwrap();
        session.create_account(name).unwrap();
    }
    session.login(accounts[0]).unwrap();
    (engine, directory)
}
