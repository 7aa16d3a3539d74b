//! Field-level envelope encryption.
//!
//! [`FieldCodec`] protects individual values at rest: credentials, TOTP
//! secrets, contact addresses and message bodies. Unscoped values are
//! encrypted under the master secret directly. Scoped values use a sub-key
//! derived with Argon2id from the length-prefixed `{master secret, domain}`
//! pair, keyed by a per-record [`FieldSalt`], so one derived key never serves
//! two domains.
//!
//! Every token embeds [`FIXED_TIMESTAMP`] instead of the wall clock so the
//! stored ciphertext does not reveal when a record was written.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use crate::config::CryptoSettings;
use crate::crypto::canonical;
use crate::crypto::kdf::KdfParams;
use crate::crypto::key::{MasterSecret, SymmetricKey, KEY_LENGTH};
use crate::crypto::random_bytes;
use crate::crypto::token::{self, FIXED_TIMESTAMP};
use crate::error::{Result, TipguardError};

/// Length of a field salt in bytes.
pub const FIELD_SALT_LENGTH: usize = 16;

/// Random salt scoping key derivation to one record.
#[derive(Clone, PartialEq, Eq)]
pub struct FieldSalt([u8; FIELD_SALT_LENGTH]);

impl FieldSalt {
    pub fn as_bytes(&self) -> &[u8; FIELD_SALT_LENGTH] {
        &self.0
    }

    /// Text form stored beside the encrypted record.
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = URL_SAFE_NO_PAD
            .decode(encoded.trim().trim_end_matches('='))
            .map_err(|_| TipguardError::Validation("Salt is not valid base64".to_string()))?;
        let salt: [u8; FIELD_SALT_LENGTH] = decoded.as_slice().try_into().map_err(|_| {
            TipguardError::Validation(format!(
                "Salt must be {} bytes (got {})",
                FIELD_SALT_LENGTH,
                decoded.len()
            ))
        })?;
        Ok(Self(salt))
    }
}

impl fmt::Debug for FieldSalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldSalt").field(&self.to_base64()).finish()
    }
}

impl Serialize for FieldSalt {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for FieldSalt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        FieldSalt::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Generate a fresh random field salt.
pub fn generate_salt() -> Result<FieldSalt> {
    Ok(FieldSalt(random_bytes::<FIELD_SALT_LENGTH>()?))
}

/// Domain and salt selecting a scoped sub-key.
#[derive(Debug, Clone, Copy)]
pub struct FieldScope<'a> {
    pub domain: &'a str,
    pub salt: &'a FieldSalt,
}

impl<'a> FieldScope<'a> {
    pub fn new(domain: &'a str, salt: &'a FieldSalt) -> Self {
        Self { domain, salt }
    }
}

/// Encrypts and decrypts individual values under the master secret.
pub struct FieldCodec {
    master: MasterSecret,
    kdf: KdfParams,
}

impl FieldCodec {
    pub fn new(master: MasterSecret, kdf: KdfParams) -> Self {
        Self { master, kdf }
    }

    /// Build a codec from settings; a missing master key is fatal.
    pub fn from_settings(settings: &CryptoSettings) -> Result<Self> {
        Ok(Self::new(settings.master_key()?, settings.kdf.field))
    }

    /// Encrypt `plaintext`, optionally under a scoped sub-key.
    pub fn encrypt(&self, plaintext: &[u8], scope: Option<FieldScope<'_>>) -> Result<String> {
        match scope {
            None => token::seal(&self.master, FIXED_TIMESTAMP, plaintext),
            Some(scope) => token::seal(&self.scoped_key(scope)?, FIXED_TIMESTAMP, plaintext),
        }
    }

    /// Decrypt a token produced by [`FieldCodec::encrypt`] with the same scope.
    ///
    /// Tamper, a wrong scope, or a wrong master secret all yield
    /// [`TipguardError::Integrity`].
    pub fn decrypt(&self, token: &str, scope: Option<FieldScope<'_>>) -> Result<Vec<u8>> {
        match scope {
            None => token::open(&self.master, token, None),
            Some(scope) => token::open(&self.scoped_key(scope)?, token, None),
        }
    }

    pub fn encrypt_str(&self, plaintext: &str, scope: Option<FieldScope<'_>>) -> Result<String> {
        self.encrypt(plaintext.as_bytes(), scope)
    }

    pub fn decrypt_str(&self, token: &str, scope: Option<FieldScope<'_>>) -> Result<String> {
        let plaintext = self.decrypt(token, scope)?;
        String::from_utf8(plaintext).map_err(|_| TipguardError::Integrity)
    }

    /// `None` stays `None`; a present value is encrypted.
    pub fn encrypt_optional(
        &self,
        plaintext: Option<&str>,
        scope: Option<FieldScope<'_>>,
    ) -> Result<Option<String>> {
        plaintext
            .map(|value| self.encrypt_str(value, scope))
            .transpose()
    }

    /// `None` stays `None`; a present token is decrypted.
    pub fn decrypt_optional(
        &self,
        token: Option<&str>,
        scope: Option<FieldScope<'_>>,
    ) -> Result<Option<String>> {
        token.map(|value| self.decrypt_str(value, scope)).transpose()
    }

    fn scoped_key(&self, scope: FieldScope<'_>) -> Result<SymmetricKey> {
        let input = Zeroizing::new(canonical::pack(&[
            &self.master.as_bytes()[..],
            scope.domain.as_bytes(),
        ]));
        let mut derived = Zeroizing::new([0u8; KEY_LENGTH]);
        self.kdf
            .derive_into(&input, scope.salt.as_bytes(), &mut derived[..])?;
        Ok(SymmetricKey::from_bytes(*derived))
    }
}

impl fmt::Debug for FieldCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCodec")
            .field("master", &self.master)
            .field("kdf", &self.kdf)
            .finish()
    }
}
