//! Recipient-keyed envelope, the default [`Cipher`].
//!
//! Layers are applied inside-out on seal and peeled outside-in on open:
//! the optional password layer wraps the plaintext first, then the
//! recipient layer wraps everything and authenticates the header.
//!
//! # Layout
//! ```text
//! [ magic "HLX1" (4) ][ flags (1) ][ recipient id, u64 BE (8) ]
//! [ ephemeral X25519 public key (32) ][ salt (16), password flag only ]
//! [ nonce (12) ][ ciphertext + GCM tag ]
//! ```

use x25519_dalek::PublicKey;

use crate::crypto;
use crate::directory::RecipientId;
use crate::error::CipherError;
use crate::keys::{self, AccountSecret, LocalIdentity, RecipientKey, PUBLIC_KEY_LEN, SALT_LEN};
use crate::pipeline::Cipher;

/// Leading bytes of every envelope.
pub const MAGIC: &[u8; 4] = b"HLX1";

const FLAG_PASSWORD: u8 = 0b0000_0001;

const FIXED_HEADER_LEN: usize = MAGIC.len() + 1 + 8 + PUBLIC_KEY_LEN;

/// What can be learned from an envelope without opening it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeInfo {
    /// Account the envelope is addressed to.
    pub recipient: RecipientId,
    /// Whether a password layer is present.
    pub password_protected: bool,
}

struct Header {
    recipient: RecipientId,
    ephemeral: [u8; PUBLIC_KEY_LEN],
    salt: Option<[u8; SALT_LEN]>,
}

impl Header {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FIXED_HEADER_LEN + SALT_LEN);
        out.extend_from_slice(MAGIC);
        out.push(if self.salt.is_some() { FLAG_PASSWORD } else { 0 });
        out.extend_from_slice(&self.recipient.0.to_be_bytes());
        out.extend_from_slice(&self.ephemeral);
        if let Some(salt) = &self.salt {
            out.extend_from_slice(salt);
        }
        out
    }

    /// Split `blob` into the parsed header, its raw bytes, and the body.
    fn decode(blob: &[u8]) -> Result<(Self, &[u8], &[u8]), CipherError> {
        if blob.len() < FIXED_HEADER_LEN || &blob[..MAGIC.len()] != MAGIC {
            return Err(CipherError::Malformed);
        }
        let flags = blob[MAGIC.len()];
        if flags & !FLAG_PASSWORD != 0 {
            return Err(CipherError::Malformed);
        }

        let id_start = MAGIC.len() + 1;
        let id_bytes: [u8; 8] = blob[id_start..id_start + 8]
            .try_into()
            .map_err(|_| CipherError::Malformed)?;
        let ephemeral: [u8; PUBLIC_KEY_LEN] = blob[id_start + 8..FIXED_HEADER_LEN]
            .try_into()
            .map_err(|_| CipherError::Malformed)?;

        let mut header_len = FIXED_HEADER_LEN;
        let salt = if flags & FLAG_PASSWORD != 0 {
            let salt: [u8; SALT_LEN] = blob
                .get(FIXED_HEADER_LEN..FIXED_HEADER_LEN + SALT_LEN)
                .ok_or(CipherError::Malformed)?
                .try_into()
                .map_err(|_| CipherError::Malformed)?;
            header_len += SALT_LEN;
            Some(salt)
        } else {
            None
        };

        let header = Self { recipient: RecipientId(u64::from_be_bytes(id_bytes)), ephemeral, salt };
        let (raw, body) = blob.split_at(header_len);
        Ok((header, raw, body))
    }
}

/// X25519 + HKDF + AES-256-GCM envelope with an optional PBKDF2 password layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCipher;

impl EnvelopeCipher {
    /// Read the header of an envelope.
    pub fn inspect(blob: &[u8]) -> Result<EnvelopeInfo, CipherError> {
        let (header, _, _) = Header::decode(blob)?;
        Ok(EnvelopeInfo { recipient: header.recipient, password_protected: header.salt.is_some() })
    }
}

impl Cipher for EnvelopeCipher {
    fn seal(
        &self,
        recipient: &RecipientKey,
        plaintext: &[u8],
        password: Option<&str>,
    ) -> Result<Vec<u8>, CipherError> {
        // Password layer (inner).
        let (salt, inner) = match password {
            Some(password) => {
                let salt: [u8; SALT_LEN] = crypto::random_array()?;
                let key = keys::derive_password_key(password, &salt);
                (Some(salt), crypto::seal(key.as_bytes(), &[], plaintext)?)
            },
            None => (None, plaintext.to_vec()),
        };

        // Recipient layer (outer), keyed by a one-off ephemeral agreement.
        let ephemeral = AccountSecret::generate()?;
        let ephemeral_public = ephemeral.public_key().to_bytes();
        let shared = ephemeral.agree(&recipient.public)?;
        let key = keys::derive_recipient_key(&shared, &ephemeral_public, recipient.public.as_bytes())?;

        let header = Header { recipient: recipient.id, ephemeral: ephemeral_public, salt }.encode();
        let body = crypto::seal(key.as_bytes(), &header, &inner)?;

        let mut blob = header;
        blob.extend_from_slice(&body);
        Ok(blob)
    }

    fn open(
        &self,
        local: &LocalIdentity,
        blob: &[u8],
        password: Option<&str>,
    ) -> Result<Vec<u8>, CipherError> {
        let (header, raw_header, body) = Header::decode(blob)?;
        if header.recipient != local.id {
            return Err(CipherError::KeyUnavailable);
        }

        let shared = local.secret.agree(&PublicKey::from(header.ephemeral))?;
        let own_public = local.secret.public_key();
        let key = keys::derive_recipient_key(&shared, &header.ephemeral, own_public.as_bytes())?;
        let inner = crypto::open(key.as_bytes(), raw_header, body)?;

        match (header.salt, password) {
            (Some(salt), Some(password)) => {
                let key = keys::derive_password_key(password, &salt);
                crypto::open(key.as_bytes(), &[], &inner)
            },
            (None, None) => Ok(inner),
            // A password was used on one side only.
            _ => Err(CipherError::Authentication),
        }
    }
}
