//! Authenticated encryption of cookie batches.
//!
//! Payloads are encrypt-then-MAC: XChaCha20-Poly1305 over the serialized
//! cookie batch, then an explicit HMAC-SHA256 integrity tag over the
//! ciphertext. Decryption verifies the tag before any decryption attempt,
//! then checks the version tag and payload age.
//!
//! The symmetric key is derived with PBKDF2-HMAC-SHA256 from a persistent
//! master secret plus a random salt; the salt travels inside each payload,
//! so any instance holding the same master secret can decrypt.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::instrument;

use crate::clock::epoch_ms;

use super::record::CookieRecord;

type HmacSha256 = Hmac<Sha256>;

/// Payload format version emitted by this cipher.
pub const PAYLOAD_VERSION: &str = "2.0";

/// Maximum accepted payload age (24 hours).
const MAX_PAYLOAD_AGE_MS: i64 = 24 * 60 * 60 * 1000;

const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const PBKDF2_ROUNDS: u32 = 10_000;

/// An encrypted cookie batch.
///
/// Immutable once created. `ciphertext` is base64; `iv`, `salt`, and
/// `integrity_tag` are hex. The salt makes the payload self-describing:
/// decryption re-derives the key from the master secret and this salt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    /// Base64-encoded ciphertext.
    pub ciphertext: String,
    /// Hex-encoded nonce used for this payload.
    pub iv: String,
    /// Hex-encoded HMAC-SHA256 tag over the ciphertext.
    pub integrity_tag: String,
    /// Hex-encoded key-derivation salt.
    pub salt: String,
    /// Payload format version.
    pub version: String,
    /// Creation time in epoch milliseconds.
    pub timestamp: i64,
}

/// Errors raised by encryption, decryption, and integrity checking.
///
/// These are never downgraded to warnings and never retried.
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    /// The integrity tag did not match the ciphertext.
    #[error("data integrity check failed")]
    IntegrityCheckFailed,

    /// Encryption failed.
    #[error("encryption failed")]
    EncryptionFailed,

    /// Decryption failed after the integrity check passed.
    #[error("decryption failed")]
    DecryptionFailed,

    /// The payload declares a version this cipher does not support.
    #[error("unsupported payload version: {version}")]
    UnsupportedVersion {
        /// The version string found in the payload.
        version: String,
    },

    /// The payload is older than the accepted maximum age.
    #[error("payload has expired ({age_ms} ms old)")]
    StalePayload {
        /// Observed payload age in milliseconds.
        age_ms: i64,
    },

    /// A payload field could not be decoded.
    #[error("malformed payload field: {field}")]
    MalformedPayload {
        /// Name of the undecodable field.
        field: &'static str,
    },
}

// Inner payload wrapped by the ciphertext. Version and timestamp ride inside
// the encrypted envelope so they are covered by the AEAD tag as well.
#[derive(Serialize, Deserialize)]
struct InnerPayload {
    data: Vec<CookieRecord>,
    version: String,
    timestamp: i64,
}

/// Authenticated cipher for cookie batches.
pub struct CookieCipher {
    master_key: String,
    salt: [u8; SALT_LEN],
    key: [u8; KEY_LEN],
}

impl CookieCipher {
    /// Creates a cipher from persistent master key material.
    ///
    /// A fresh random salt is drawn per instance; the derived key is reused
    /// for every payload this instance encrypts. Decryption accepts payloads
    /// from other instances by re-deriving with the payload's own salt.
    #[must_use]
    pub fn new(master_key: impl Into<String>) -> Self {
        let master_key = master_key.into();
        let mut salt = [0_u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = derive_key(&master_key, &salt);
        Self {
            master_key,
            salt,
            key,
        }
    }

    /// Encrypts a batch of cookies into a self-describing payload.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::EncryptionFailed`] when serialization or
    /// encryption fails.
    #[instrument(level = "debug", skip(self, cookies), fields(count = cookies.len()))]
    pub fn encrypt(&self, cookies: &[CookieRecord]) -> Result<EncryptedPayload, SecurityError> {
        let timestamp = epoch_ms();
        let inner = InnerPayload {
            data: cookies.to_vec(),
            version: PAYLOAD_VERSION.to_string(),
            timestamp,
        };
        let plaintext =
            serde_json::to_vec(&inner).map_err(|_| SecurityError::EncryptionFailed)?;

        let mut nonce = [0_u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key));
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| SecurityError::EncryptionFailed)?;

        let tag = integrity_tag(&self.key, &ciphertext)?;

        Ok(EncryptedPayload {
            ciphertext: base64_encode(&ciphertext),
            iv: hex_encode(&nonce),
            integrity_tag: hex_encode(&tag),
            salt: hex_encode(&self.salt),
            version: PAYLOAD_VERSION.to_string(),
            timestamp,
        })
    }

    /// Decrypts a payload back into cookies.
    ///
    /// The integrity tag is verified in constant time before decryption; a
    /// mismatch aborts immediately. After decryption the inner version tag
    /// and payload age are checked.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::IntegrityCheckFailed`] on tag mismatch,
    /// [`SecurityError::UnsupportedVersion`] / [`SecurityError::StalePayload`]
    /// on envelope checks, and [`SecurityError::MalformedPayload`] /
    /// [`SecurityError::DecryptionFailed`] otherwise.
    #[instrument(level = "debug", skip(self, payload))]
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Vec<CookieRecord>, SecurityError> {
        let salt = hex_decode(&payload.salt)
            .ok_or(SecurityError::MalformedPayload { field: "salt" })?;
        let ciphertext = base64_decode(&payload.ciphertext)
            .ok_or(SecurityError::MalformedPayload { field: "ciphertext" })?;
        let nonce = hex_decode(&payload.iv)
            .filter(|bytes| bytes.len() == NONCE_LEN)
            .ok_or(SecurityError::MalformedPayload { field: "iv" })?;
        let expected_tag = hex_decode(&payload.integrity_tag)
            .ok_or(SecurityError::MalformedPayload { field: "integrityTag" })?;

        let key = self.key_for_salt(&salt);
        verify_integrity_tag(&key, &ciphertext, &expected_tag)?;

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(XNonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| SecurityError::DecryptionFailed)?;

        let inner: InnerPayload =
            serde_json::from_slice(&plaintext).map_err(|_| SecurityError::DecryptionFailed)?;

        if inner.version != PAYLOAD_VERSION {
            return Err(SecurityError::UnsupportedVersion {
                version: inner.version,
            });
        }

        let age_ms = epoch_ms() - inner.timestamp;
        if age_ms > MAX_PAYLOAD_AGE_MS {
            return Err(SecurityError::StalePayload { age_ms });
        }

        Ok(inner.data)
    }

    // Reuses the instance key when the payload carries our own salt,
    // otherwise re-derives for the foreign salt.
    fn key_for_salt(&self, salt: &[u8]) -> [u8; KEY_LEN] {
        if salt == self.salt {
            self.key
        } else {
            derive_key(&self.master_key, salt)
        }
    }
}

fn derive_key(master_key: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0_u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(master_key.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    key
}

fn integrity_tag(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, SecurityError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| SecurityError::EncryptionFailed)?;
    mac.update(ciphertext);
    Ok(mac.finalize().into_bytes().to_vec())
}

// Tag comparison is constant-time via Mac::verify_slice.
fn verify_integrity_tag(
    key: &[u8],
    ciphertext: &[u8],
    expected: &[u8],
) -> Result<(), SecurityError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| SecurityError::IntegrityCheckFailed)?;
    mac.update(ciphertext);
    mac.verify_slice(expected)
        .map_err(|_| SecurityError::IntegrityCheckFailed)
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(text: &str) -> Option<Vec<u8>> {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.decode(text).ok()
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

fn hex_decode(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}
