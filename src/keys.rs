//! Key material and derivation.
//!
//! This module owns three responsibilities:
//! 1. Holding account secrets (X25519) in types that are opaque,
//!    non-cloneable, and zeroised on drop.
//! 2. Deriving per-envelope layer keys: HKDF-SHA256 over an X25519 shared
//!    secret for the recipient layer, PBKDF2-HMAC-SHA256 for the optional
//!    password layer.
//! 3. The local keyring: the account secrets this process provisioned.
//!
//! ## Recipient layer derivation
//!
//! ```text
//! HKDF-SHA256(
//!     ikm  = X25519(ephemeral_secret, recipient_public),
//!     salt = ephemeral_public || recipient_public,
//!     info = "helix envelope v1"
//! )
//! ```

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use ring::{hkdf, pbkdf2};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{self, KEY_LEN};
use crate::directory::RecipientId;
use crate::error::CipherError;

/// Size of an X25519 public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Size of the random salt fed to PBKDF2.
pub const SALT_LEN: usize = 16;

/// PBKDF2 work factor for the password layer.
const PBKDF2_ITERATIONS: u32 = 100_000;

const ENVELOPE_INFO: &[u8] = b"helix envelope v1";

// ---------------------------------------------------------------------------
// Account secret
// ---------------------------------------------------------------------------

/// The private half of an account key pair.
///
/// - Not `Clone`. Shared between the keyring and in-flight decrypts via `Arc`.
/// - Zeroised on drop (the inner `StaticSecret` wipes itself).
pub struct AccountSecret {
    secret: StaticSecret,
}

impl AccountSecret {
    /// Generate a fresh account secret from the system CSPRNG.
    pub fn generate() -> Result<Self, CipherError> {
        let bytes = Zeroizing::new(crypto::random_array::<KEY_LEN>()?);
        Ok(Self { secret: StaticSecret::from(*bytes) })
    }

    /// The public key to register with the key directory.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.secret)
    }

    /// X25519 agreement with a peer public key.
    ///
    /// Returns `KeyUnavailable` when the result is non-contributory
    /// (the peer key is a low-order point).
    pub(crate) fn agree(&self, peer: &PublicKey) -> Result<Zeroizing<[u8; 32]>, CipherError> {
        let shared = self.secret.diffie_hellman(peer);
        if !shared.was_contributory() {
            return Err(CipherError::KeyUnavailable);
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}

impl fmt::Debug for AccountSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSecret").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Public key material
// ---------------------------------------------------------------------------

/// A recipient's public identity as published by the key directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipientKey {
    /// Directory-assigned account id.
    pub id: RecipientId,
    /// The account's X25519 public key.
    pub public: PublicKey,
}

/// The logged-in account as seen by the cipher when opening blobs.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    /// Directory-assigned account id.
    pub id: RecipientId,
    /// The account secret, shared with the keyring.
    pub secret: Arc<AccountSecret>,
}

// ---------------------------------------------------------------------------
// Derived layer keys
// ---------------------------------------------------------------------------

/// A symmetric key for one envelope layer. Zeroised on drop, never cloned.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct LayerKey {
    bytes: [u8; KEY_LEN],
}

impl LayerKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

/// Derive the recipient layer key from an X25519 shared secret.
pub(crate) fn derive_recipient_key(
    shared: &[u8; 32],
    ephemeral_public: &[u8; PUBLIC_KEY_LEN],
    recipient_public: &[u8; PUBLIC_KEY_LEN],
) -> Result<LayerKey, CipherError> {
    let mut salt_bytes = [0u8; PUBLIC_KEY_LEN * 2];
    salt_bytes[..PUBLIC_KEY_LEN].copy_from_slice(ephemeral_public);
    salt_bytes[PUBLIC_KEY_LEN..].copy_from_slice(recipient_public);

    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &salt_bytes);
    let prk = salt.extract(shared);

    let info = [ENVELOPE_INFO];
    let okm = prk
        .expand(&info, hkdf::HKDF_SHA256)
        .map_err(|_| CipherError::KeyDerivation)?;

    let mut key = LayerKey { bytes: [0u8; KEY_LEN] };
    okm.fill(&mut key.bytes).map_err(|_| CipherError::KeyDerivation)?;
    Ok(key)
}

/// Derive the password layer key.
pub(crate) fn derive_password_key(password: &str, salt: &[u8; SALT_LEN]) -> LayerKey {
    let mut key = LayerKey { bytes: [0u8; KEY_LEN] };
    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        password.as_bytes(),
        &mut key.bytes,
    );
    key
}

// ---------------------------------------------------------------------------
// Keyring
// ---------------------------------------------------------------------------

/// Account secrets provisioned by this process, keyed by account id.
#[derive(Debug, Default)]
pub struct Keyring {
    secrets: HashMap<RecipientId, Arc<AccountSecret>>,
}

impl Keyring {
    /// Store the secret for an account, replacing any previous one.
    pub fn insert(&mut self, id: RecipientId, secret: AccountSecret) {
        self.secrets.insert(id, Arc::new(secret));
    }

    /// Borrow a shared handle to an account secret.
    pub fn get(&self, id: RecipientId) -> Option<Arc<AccountSecret>> {
        self.secrets.get(&id).cloned()
    }

    /// Forget an account secret. In-flight decrypts keep their own `Arc`.
    pub fn remove(&mut self, id: RecipientId) -> bool {
        self.secrets.remove(&id).is_some()
    }

    /// Drop every held secret.
    pub fn clear(&mut self) {
        self.secrets.clear();
    }

    /// Number of held secrets.
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Returns true if no secret is held.
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}
