mod common;

use std::sync::Arc;

use helix_client::directory::RecipientId;
use helix_client::envelope::EnvelopeCipher;
use helix_client::error::{CipherError, HelixError, RegistryError, SessionError};
use helix_client::keys::{AccountSecret, LocalIdentity, RecipientKey};
use helix_client::pipeline::Cipher;
use helix_client::promise::{PromiseStatus, Timeout};
use helix_client::recipient::RecipientHandle;
use helix_client::Engine;
use proptest::prelude::*;

async fn resolve(engine: &Engine, name: &str) -> RecipientHandle {
    let lookup = engine.recipients().resolve_recipient(name, Timeout::Millis(5_000)).unwrap();
    assert_eq!(engine.registry().wait(lookup, Timeout::Infinite).await.unwrap(), PromiseStatus::DataAvailable);
    engine.recipients().recipient(lookup).unwrap()
}

#[tokio::test]
async fn message_to_self_round_trips() {
    let (engine, _) = common::logged_in(&["alice"]);
    let registry = engine.registry();
    let alice = resolve(&engine, "alice").await;

    for password in [None, Some("correct horse")] {
        let encrypt = engine.cipher().encrypt_start(alice, b"Hello, Helix", password).unwrap();
        assert_eq!(registry.wait(encrypt, Timeout::Infinite).await.unwrap(), PromiseStatus::DataAvailable);
        let blob = registry.get_result(encrypt).unwrap();
        assert_ne!(blob.as_slice(), b"Hello, Helix");

        let decrypt = engine.cipher().decrypt_start(&blob, password).unwrap();
        assert_eq!(registry.wait(decrypt, Timeout::Infinite).await.unwrap(), PromiseStatus::DataAvailable);
        assert_eq!(registry.get_result(decrypt).unwrap(), b"Hello, Helix");
    }
}

#[tokio::test]
async fn empty_plaintext_round_trips() {
    let (engine, _) = common::logged_in(&["alice"]);
    let registry = engine.registry();
    let alice = resolve(&engine, "alice").await;

    let encrypt = engine.cipher().encrypt_start(alice, b"", None).unwrap();
    registry.wait(encrypt, Timeout::Infinite).await.unwrap();
    let blob = registry.get_result(encrypt).unwrap();
    assert!(!blob.is_empty());

    let decrypt = engine.cipher().decrypt_start(&blob, None).unwrap();
    assert_eq!(registry.wait(decrypt, Timeout::Infinite).await.unwrap(), PromiseStatus::DataAvailable);
    assert!(registry.get_result(decrypt).unwrap().is_empty());
}

#[tokio::test]
async fn wrong_password_fails_decrypt() {
    let (engine, _) = common::logged_in(&["alice"]);
    let registry = engine.registry();
    let alice = resolve(&engine, "alice").await;

    let encrypt = engine.cipher().encrypt_start(alice, b"secret", Some("right")).unwrap();
    registry.wait(encrypt, Timeout::Infinite).await.unwrap();
    let blob = registry.get_result(encrypt).unwrap();

    for password in [Some("wrong"), None] {
        let decrypt = engine.cipher().decrypt_start(&blob, password).unwrap();
        assert_eq!(registry.wait(decrypt, Timeout::Infinite).await.unwrap(), PromiseStatus::Failed);
        assert_eq!(registry.get_result(decrypt), Err(RegistryError::OperationFailed(decrypt)));
    }
}

#[tokio::test]
async fn blob_for_another_account_fails_decrypt() {
    let (engine, _) = common::logged_in(&["alice", "bob"]);
    let registry = engine.registry();
    let bob = resolve(&engine, "bob").await;

    let encrypt = engine.cipher().encrypt_start(bob, b"for bob only", None).unwrap();
    registry.wait(encrypt, Timeout::Infinite).await.unwrap();
    let blob = registry.get_result(encrypt).unwrap();

    // Logged in as alice.
    let decrypt = engine.cipher().decrypt_start(&blob, None).unwrap();
    assert_eq!(registry.wait(decrypt, Timeout::Infinite).await.unwrap(), PromiseStatus::Failed);
}

#[tokio::test]
async fn garbage_fails_decrypt() {
    let (engine, _) = common::logged_in(&["alice"]);
    let registry = engine.registry();

    let decrypt = engine.cipher().decrypt_start(b"definitely not an envelope", None).unwrap();
    assert_eq!(registry.wait(decrypt, Timeout::Infinite).await.unwrap(), PromiseStatus::Failed);
}

#[tokio::test]
async fn released_recipient_is_rejected_up_front() {
    let (engine, _) = common::logged_in(&["alice"]);
    let alice = resolve(&engine, "alice").await;
    engine.recipients().release(alice).unwrap();

    let err = engine.cipher().encrypt_start(alice, b"x", None).unwrap_err();
    assert_eq!(err, HelixError::Registry(RegistryError::UnknownHandle(alice.into())));
    assert!(engine.registry().len() == 1, "only the lookup promise is registered");
}

#[tokio::test]
async fn cipher_calls_require_login() {
    let (engine, _) = common::logged_in(&["alice"]);
    let alice = resolve(&engine, "alice").await;
    engine.session().disconnect().unwrap();

    assert!(matches!(
        engine.cipher().encrypt_start(alice, b"x", None),
        Err(HelixError::Session(SessionError::InvalidState { .. }))
    ));
    assert!(matches!(
        engine.cipher().decrypt_start(b"x", None),
        Err(HelixError::Session(SessionError::InvalidState { .. }))
    ));
}

#[test]
fn tampered_envelope_is_rejected() {
    let secret = AccountSecret::generate().unwrap();
    let key = RecipientKey { id: RecipientId(3), public: secret.public_key() };
    let local = LocalIdentity { id: RecipientId(3), secret: Arc::new(secret) };

    let mut blob = EnvelopeCipher.seal(&key, b"payload", None).unwrap();
    let last = blob.len() - 1;
    blob[last] ^= 0x01;
    assert_eq!(EnvelopeCipher.open(&local, &blob, None), Err(CipherError::Authentication));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn envelope_round_trips_any_payload(
        payload in proptest::collection::vec(any::<u8>(), 0..2048),
        password in proptest::option::of("[a-zA-Z0-9]{1,24}"),
    ) {
        let secret = AccountSecret::generate().unwrap();
        let key = RecipientKey { id: RecipientId(42), public: secret.public_key() };
        let local = LocalIdentity { id: RecipientId(42), secret: Arc::new(secret) };

        let blob = EnvelopeCipher.seal(&key, &payload, password.as_deref()).unwrap();
        let opened = EnvelopeCipher.open(&local, &blob, password.as_deref()).unwrap();
        prop_assert_eq!(opened, payload);
    }
}
