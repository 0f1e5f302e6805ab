//! Low-level AEAD operations.
//!
//! This module and `keys` are the only places that import `ring` directly.
//! The envelope cipher seals and opens every layer through the functions
//! exposed here.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM (authenticated encryption)
//! - **Nonce**: 96-bit (12 bytes), generated fresh per operation via `SystemRandom`
//! - **Key size**: 256 bits (32 bytes)

use ring::aead::{self, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::CipherError;

/// The AEAD algorithm used for every envelope layer.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of a symmetric layer key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Size of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Fill `buf` from the system CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CipherError> {
    SystemRandom::new().fill(buf).map_err(|_| CipherError::Randomness)
}

/// Produce `N` random bytes.
pub fn random_array<const N: usize>() -> Result<[u8; N], CipherError> {
    let mut buf = [0u8; N];
    fill_random(&mut buf)?;
    Ok(buf)
}

fn layer_key(key_bytes: &[u8; KEY_LEN]) -> Result<LessSafeKey, CipherError> {
    let unbound = UnboundKey::new(ALGORITHM, key_bytes).map_err(|_| CipherError::KeyDerivation)?;
    Ok(LessSafeKey::new(unbound))
}

/// Seal `plaintext` under `key_bytes`, binding `aad`.
///
/// # Layout of returned bytes
/// ```text
/// [ nonce (12 bytes) ][ ciphertext + GCM tag ]
/// ```
pub fn seal(key_bytes: &[u8; KEY_LEN], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let key = layer_key(key_bytes)?;
    let nonce_bytes: [u8; NONCE_LEN] = random_array()?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, aead::Aad::from(aad), &mut in_out)
        .map_err(|_| CipherError::Encryption)?;

    let mut output = Vec::with_capacity(NONCE_LEN + in_out.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&in_out);
    Ok(output)
}

/// Open bytes produced by [`seal`] with the same key and `aad`.
///
/// A wrong key, a different `aad`, or any flipped bit fails the tag check;
/// no partial plaintext is ever returned.
pub fn open(key_bytes: &[u8; KEY_LEN], aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CipherError::Malformed);
    }

    let (nonce_bytes, body) = sealed.split_at(NONCE_LEN);
    let nonce_bytes: [u8; NONCE_LEN] = nonce_bytes.try_into().map_err(|_| CipherError::Malformed)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let key = layer_key(key_bytes)?;
    let mut payload = body.to_vec();
    let plaintext = key
        .open_in_place(nonce, aead::Aad::from(aad), &mut payload)
        .map_err(|_| CipherError::Authentication)?;

    Ok(plaintext.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_rejects_mismatched_aad() {
        let key = [7u8; KEY_LEN];
        let sealed = seal(&key, b"header-a", b"payload").unwrap();
        assert_eq!(open(&key, b"header-a", &sealed).unwrap(), b"payload");
        assert_eq!(open(&key, b"header-b", &sealed), Err(CipherError::Authentication));
    }

    #[test]
    fn open_rejects_truncated_input() {
        let key = [7u8; KEY_LEN];
        assert_eq!(open(&key, b"", &[0u8; NONCE_LEN + TAG_LEN - 1]), Err(CipherError::Malformed));
    }

    #[test]
    fn fresh_nonce_per_seal() {
        let key = [1u8; KEY_LEN];
        let a = seal(&key, b"", b"same").unwrap();
        let b = seal(&key, b"", b"same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }
}
