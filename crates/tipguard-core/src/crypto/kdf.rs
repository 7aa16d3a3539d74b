//! Memory-hard key derivation using Argon2id.

use argon2::Argon2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TipguardError};

/// Minimum salt length accepted by Argon2.
pub const MIN_SALT_LENGTH: usize = 8;

/// Argon2id cost parameters.
///
/// The defaults are deliberately slow. Callers that derive keys on a request
/// path should construct the deriving component once and reuse it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl KdfParams {
    /// Cost for per-field scoped keys: 19 MiB, 2 passes.
    pub const FIELD: KdfParams = KdfParams {
        memory_kib: 19 * 1024,
        iterations: 2,
        parallelism: 1,
    };

    /// Cost for the vault root key: 128 MiB, 3 passes.
    pub const VAULT: KdfParams = KdfParams {
        memory_kib: 128 * 1024,
        iterations: 3,
        parallelism: 1,
    };

    /// The smallest cost Argon2 accepts. Only for tests.
    pub const MINIMAL: KdfParams = KdfParams {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    };

    /// Fill `out` with Argon2id(password, salt).
    pub fn derive_into(&self, password: &[u8], salt: &[u8], out: &mut [u8]) -> Result<()> {
        if salt.len() < MIN_SALT_LENGTH {
            return Err(TipguardError::Validation(format!(
                "Salt must be at least {} bytes",
                MIN_SALT_LENGTH
            )));
        }

        let params = argon2::Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(out.len()),
        )
        .map_err(|e| TipguardError::Configuration(format!("Invalid Argon2 params: {}", e)))?;

        Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
            .hash_password_into(password, salt, out)
            .map_err(|e| TipguardError::Configuration(format!("Key derivation failed: {}", e)))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::FIELD
    }
}
