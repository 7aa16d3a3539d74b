//! # Tipguard Core
//!
//! Confidentiality and authentication layer for an anonymous tip-submission
//! service.
//!
//! ## Architecture
//!
//! - **crypto**: field envelope encryption, token framing, key derivation, and
//!   public-key sealing of submissions
//! - **vault**: infrastructure keys derived from an admin secret and a
//!   per-installation device salt
//! - **session**: authenticated-encrypted session cookies
//! - **twofactor**: TOTP setup, login verification, replay and rate limiting
//! - **config**: settings and environment loading
//!
//! Components are plain values built once at startup and passed to whatever
//! needs them. Nothing here keeps process-global state.

pub mod config;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod session;
pub mod twofactor;
pub mod vault;

pub use config::CryptoSettings;
pub use crypto::{FieldCodec, FieldSalt, FieldScope, MessageSealer, SymmetricKey};
pub use error::{Result, TipguardError};
pub use session::{Session, SessionTransport};
pub use twofactor::{TwoFactor, TwoFactorState, Verification};
pub use vault::{SecretVault, VaultOptions};

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
