//! Operator-facing failures and the exit code each one maps to.

use thiserror::Error;
use tipguard_core::TipguardError;

use crate::constants::exit_codes;

#[derive(Debug, Error)]
pub enum CliError {
    /// Config file, vault entry or key file is absent
    #[error("{message}\n{hint}")]
    NotFound { message: String, hint: String },

    /// Recipient key rejected or attempt throttled
    #[error("{message}{}", hint.as_deref().map(|h| format!("\n{}", h)).unwrap_or_default())]
    AuthFailed {
        message: String,
        hint: Option<String>,
    },

    #[error("{0}")]
    InvalidInput(String),

    /// Token failed authentication
    #[error("{0}")]
    IntegrityFailed(String),

    /// Missing or malformed key material
    #[error("{message}\n{hint}")]
    Configuration { message: String, hint: String },

    /// Filesystem, database or serialization failure
    #[error("{0}")]
    Storage(String),
}

impl CliError {
    pub fn not_found(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            hint: hint.into(),
        }
    }

    pub fn auth_failed_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::AuthFailed {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => exit_codes::NOT_FOUND,
            Self::AuthFailed { .. } => exit_codes::AUTH_FAILED,
            Self::InvalidInput(_) => exit_codes::INVALID_INPUT,
            Self::IntegrityFailed(_) => exit_codes::INTEGRITY_FAILED,
            Self::Configuration { .. } => exit_codes::CONFIGURATION,
            Self::Storage(_) => exit_codes::STORAGE,
        }
    }

    /// Report on stderr and terminate with [`Self::exit_code`].
    pub fn exit(&self) -> ! {
        eprintln!("tipguard: {}", self);
        std::process::exit(self.exit_code())
    }
}

impl From<TipguardError> for CliError {
    fn from(err: TipguardError) -> Self {
        match err {
            TipguardError::Configuration(message) => CliError::Configuration {
                hint: configuration_hint(&message).to_string(),
                message,
            },
            TipguardError::Integrity => CliError::IntegrityFailed(
                "Decryption failed: the token was altered, or the key, domain or salt differ"
                    .to_string(),
            ),
            TipguardError::Validation(message) => CliError::InvalidInput(message),
            TipguardError::Throttled => CliError::AuthFailed {
                message: "Too many attempts".to_string(),
                hint: None,
            },
            err @ (TipguardError::Storage(_)
            | TipguardError::Sqlite { .. }
            | TipguardError::Io { .. }
            | TipguardError::Json { .. }) => CliError::Storage(err.to_string()),
        }
    }
}

/// Pick the remedy for a configuration failure from what it names.
fn configuration_hint(message: &str) -> &'static str {
    if message.starts_with("Admin secret") {
        "Hint: Set TIPGUARD_ADMIN_SECRET or enter the secret when prompted."
    } else if message.starts_with("Device salt") {
        "Hint: Restore the vault's device salt from backup, or point TIPGUARD_VAULT_DIR at the right vault."
    } else if message.starts_with("Session encryption key") {
        "Hint: Run `tipguard gen-key` and export the key as SESSION_ENCRYPTION_KEY."
    } else if message.starts_with("Invalid Argon2") || message.starts_with("Key derivation") {
        "Hint: Check the [crypto.kdf] settings in the config file."
    } else if message.starts_with("System RNG") {
        "Hint: The operating system random number generator is unavailable."
    } else if message.starts_with("Encryption key") || message.starts_with("Key ") {
        "Hint: Run `tipguard gen-key` and export the key as ENCRYPTION_KEY."
    } else {
        "Hint: Check the config file and environment."
    }
}
