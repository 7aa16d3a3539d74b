//! Per-user OTP record and its persistence boundary.
//!
//! [`OtpRecord`] holds the plaintext shared secret while a request is being
//! served. It only reaches storage as a [`StoredOtpRecord`], produced by
//! [`OtpRecord::to_stored`] and read back by [`OtpRecord::from_stored`]; both
//! run the field codec under the `totp_secret` domain, so the secret is never
//! persisted unencrypted.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::field::{generate_salt, FieldCodec, FieldSalt, FieldScope};
use crate::error::Result;

/// Field domain for encrypted TOTP secrets.
pub const TOTP_SECRET_DOMAIN: &str = "totp_secret";

/// Database row for an OTP record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOtpRecord {
    pub user_id: i64,
    pub salt: FieldSalt,
    /// Encrypted base32 secret. `None` when two-factor is off.
    pub totp_secret: Option<String>,
}

pub struct OtpRecord {
    user_id: i64,
    salt: FieldSalt,
    secret: Option<Zeroizing<String>>,
}

impl OtpRecord {
    /// A record with no committed secret and a fresh salt.
    pub fn new(user_id: i64) -> Result<Self> {
        Ok(Self {
            user_id,
            salt: generate_salt()?,
            secret: None,
        })
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn is_committed(&self) -> bool {
        self.secret.is_some()
    }

    pub(crate) fn secret(&self) -> Option<&str> {
        self.secret.as_deref().map(String::as_str)
    }

    pub(crate) fn commit(&mut self, secret: Zeroizing<String>) {
        self.secret = Some(secret);
    }

    pub(crate) fn clear(&mut self) {
        self.secret = None;
    }

    /// Encrypt for storage.
    pub fn to_stored(&self, codec: &FieldCodec) -> Result<StoredOtpRecord> {
        let scope = FieldScope::new(TOTP_SECRET_DOMAIN, &self.salt);
        Ok(StoredOtpRecord {
            user_id: self.user_id,
            salt: self.salt.clone(),
            totp_secret: codec.encrypt_optional(self.secret(), Some(scope))?,
        })
    }

    /// Decrypt a stored row. A token that fails to decrypt is an error, not
    /// an unconfigured record.
    pub fn from_stored(stored: StoredOtpRecord, codec: &FieldCodec) -> Result<Self> {
        let scope = FieldScope::new(TOTP_SECRET_DOMAIN, &stored.salt);
        let secret = codec
            .decrypt_optional(stored.totp_secret.as_deref(), Some(scope))?
            .map(Zeroizing::new);
        Ok(Self {
            user_id: stored.user_id,
            salt: stored.salt,
            secret,
        })
    }
}

impl std::fmt::Debug for OtpRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpRecord")
            .field("user_id", &self.user_id)
            .field("salt", &self.salt)
            .field("committed", &self.is_committed())
            .finish()
    }
}
