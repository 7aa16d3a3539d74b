//! Symmetric key material.
//!
//! Every 256-bit key that crosses a component boundary (the master secret,
//! the session transport key, scoped field keys) is held in a
//! [`SymmetricKey`], which zeroizes on drop and never prints its bytes.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::random_bytes;
use crate::error::{Result, TipguardError};

/// Length of every symmetric key in bytes (256 bits).
pub const KEY_LENGTH: usize = 32;

/// A 256-bit symmetric key.
///
/// Key material is zeroized from memory when dropped.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SymmetricKey {
    key: [u8; KEY_LENGTH],
}

/// The process-wide master secret used by the field codec.
pub type MasterSecret = SymmetricKey;

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub(crate) fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self { key: bytes }
    }

    /// Build a key from a slice, which must be exactly [`KEY_LENGTH`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| {
            TipguardError::Configuration(format!(
                "Key must be {} bytes (got {})",
                KEY_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self::from_bytes(key))
    }

    /// Decode a base64 key as found in process configuration.
    ///
    /// Both the standard and URL-safe alphabets are accepted, since
    /// operators commonly paste keys produced by either.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let trimmed = encoded.trim();
        let mut decoded = STANDARD
            .decode(trimmed)
            .or_else(|_| URL_SAFE.decode(trimmed))
            .map_err(|_| TipguardError::Configuration("Key is not valid base64".to_string()))?;
        let key = Self::from_slice(&decoded);
        decoded.zeroize();
        key
    }

    /// Generate a fresh random key.
    pub fn generate() -> Result<Self> {
        Ok(Self::from_bytes(random_bytes::<KEY_LENGTH>()?))
    }

    /// Get a reference to the raw key bytes.
    ///
    /// Use only for immediate cipher construction; never store or log.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// URL-safe base64 form, suitable for configuration files.
    pub fn to_base64(&self) -> String {
        URL_SAFE.encode(self.key)
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
