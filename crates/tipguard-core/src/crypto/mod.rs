//! Cryptographic building blocks for Tipguard.
//!
//! This module provides the symmetric and public-key primitives the rest of
//! the crate composes, using well-audited libraries:
//! - **XChaCha20-Poly1305 / ChaCha20-Poly1305**: authenticated encryption
//! - **Argon2id**: memory-hard key derivation
//! - **Age**: single-recipient public-key sealing
//!
//! ## Security Model
//!
//! - Key material is zeroized from memory on drop
//! - Every symmetric ciphertext is authenticated; decryption fails closed
//! - Field tokens never embed the real encryption time
//! - Submitted content is sealed for the recipient without a sender signature

pub mod canonical;
pub mod field;
pub mod kdf;
pub mod key;
pub mod sealing;
pub mod token;

pub use field::{generate_salt, FieldCodec, FieldSalt, FieldScope};
pub use kdf::KdfParams;
pub use key::{MasterSecret, SymmetricKey, KEY_LENGTH};
pub use sealing::{
    is_sealed, pad, AgeEngine, MessageSealer, OpenPgpEngine, SealingEngine, SealingError,
};

use crate::error::{Result, TipguardError};

/// Fill a fixed-size array from the operating system RNG.
pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).map_err(|e| {
        TipguardError::Configuration(format!("System RNG unavailable: {}", e))
    })?;
    Ok(bytes)
}
