//! Versioned authenticated-encryption tokens.
//!
//! Layout, before base64url encoding:
//!
//! ```text
//! version (1) | timestamp (8, big-endian) | nonce (24) | ciphertext + tag
//! ```
//!
//! The header (version and timestamp) is bound as associated data, so the
//! timestamp cannot be altered without failing authentication. Field tokens
//! always carry [`FIXED_TIMESTAMP`]; session tokens carry the issue time so a
//! maximum age can be enforced on open.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};

use crate::crypto::key::SymmetricKey;
use crate::crypto::random_bytes;
use crate::error::{Result, TipguardError};

/// Version byte of symmetric-key tokens.
pub const TOKEN_VERSION: u8 = 0x80;

/// Timestamp embedded in every field token in place of the wall clock.
pub const FIXED_TIMESTAMP: u64 = 0;

/// Tokens stamped further than this into the future are rejected when a
/// maximum age is enforced.
pub const MAX_CLOCK_SKEW_SECS: u64 = 60;

const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Version and timestamp prefix shared by every token format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub version: u8,
    pub timestamp: u64,
}

impl Header {
    pub const LEN: usize = 9;

    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[0] = self.version;
        bytes[1..].copy_from_slice(&self.timestamp.to_be_bytes());
        bytes
    }

    /// Parse and version-check the header at the start of `raw`.
    pub fn parse(raw: &[u8], expected_version: u8) -> Result<Self> {
        if raw.len() < Self::LEN || raw[0] != expected_version {
            return Err(TipguardError::Integrity);
        }
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&raw[1..Self::LEN]);
        Ok(Self {
            version: raw[0],
            timestamp: u64::from_be_bytes(timestamp),
        })
    }
}

/// Maximum-age constraint applied when opening a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxAge {
    /// Allowed age in seconds
    pub ttl_secs: u64,
    /// Current time in Unix seconds
    pub now: u64,
}

impl MaxAge {
    pub(crate) fn check(&self, timestamp: u64) -> Result<()> {
        if timestamp.saturating_add(self.ttl_secs) < self.now {
            return Err(TipguardError::Integrity);
        }
        if timestamp > self.now.saturating_add(MAX_CLOCK_SKEW_SECS) {
            return Err(TipguardError::Integrity);
        }
        Ok(())
    }
}

/// Encode token bytes as padded base64url.
pub fn encode(raw: &[u8]) -> String {
    URL_SAFE.encode(raw)
}

/// Decode base64url, tolerating missing or truncated `=` padding.
pub fn decode(token: &str) -> Result<Vec<u8>> {
    let trimmed = token.trim().trim_end_matches('=');
    Ok(URL_SAFE_NO_PAD.decode(trimmed)?)
}

/// Encrypt `plaintext` under `key`, stamping `timestamp` into the header.
pub fn seal(key: &SymmetricKey, timestamp: u64, plaintext: &[u8]) -> Result<String> {
    let header = Header {
        version: TOKEN_VERSION,
        timestamp,
    }
    .to_bytes();
    let nonce = random_bytes::<NONCE_LEN>()?;

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let ciphertext = cipher.encrypt(
        XNonce::from_slice(&nonce),
        Payload {
            msg: plaintext,
            aad: &header,
        },
    )?;

    let mut raw = Vec::with_capacity(Header::LEN + NONCE_LEN + ciphertext.len());
    raw.extend_from_slice(&header);
    raw.extend_from_slice(&nonce);
    raw.extend_from_slice(&ciphertext);
    Ok(encode(&raw))
}

/// Decrypt a token, optionally enforcing a maximum age.
///
/// Every failure (bad encoding, wrong version, tamper, wrong key, expiry)
/// yields [`TipguardError::Integrity`]. No partial plaintext is returned.
pub fn open(key: &SymmetricKey, token: &str, max_age: Option<MaxAge>) -> Result<Vec<u8>> {
    let raw = decode(token)?;
    let header = Header::parse(&raw, TOKEN_VERSION)?;
    if raw.len() < Header::LEN + NONCE_LEN + TAG_LEN {
        return Err(TipguardError::Integrity);
    }
    if let Some(max_age) = max_age {
        max_age.check(header.timestamp)?;
    }

    let (header_bytes, body) = raw.split_at(Header::LEN);
    let (nonce, ciphertext) = body.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    Ok(cipher.decrypt(
        XNonce::from_slice(nonce),
        Payload {
            msg: ciphertext,
            aad: header_bytes,
        },
    )?)
}

/// Read the embedded timestamp without decrypting.
pub fn timestamp(token: &str) -> Result<u64> {
    let raw = decode(token)?;
    Ok(Header::parse(&raw, TOKEN_VERSION)?.timestamp)
}
