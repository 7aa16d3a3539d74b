//! Error types for Tipguard core operations.
//!
//! The variants follow one rule per failure class: configuration problems are
//! fatal and raised, integrity failures fail closed without detail, validation
//! failures describe bad input, and throttling is its own outcome. Errors from
//! the underlying crypto crates are converted at each component boundary and
//! never escape in raw form.

use thiserror::Error;

/// Result type alias for Tipguard operations.
pub type Result<T> = std::result::Result<T, TipguardError>;

/// Core error type for Tipguard operations.
#[derive(Debug, Error)]
pub enum TipguardError {
    /// Required key material is missing or malformed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Tampered data, wrong key, or expired token.
    ///
    /// Deliberately carries no detail.
    #[error("Integrity check failed")]
    Integrity,

    /// Malformed input on a path where bad input is expected
    #[error("Validation error: {0}")]
    Validation(String),

    /// Replay or rate-limit condition
    #[error("Too many attempts, try again later")]
    Throttled,

    /// Persistence backend error (generic)
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite-specific storage error
    #[error("SQLite error: {source}")]
    Sqlite {
        #[from]
        source: rusqlite::Error,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl TipguardError {
    /// True for errors an operator must fix before the process can work.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TipguardError::Configuration(_))
    }
}

impl From<chacha20poly1305::Error> for TipguardError {
    fn from(_: chacha20poly1305::Error) -> Self {
        TipguardError::Integrity
    }
}

impl From<base64::DecodeError> for TipguardError {
    fn from(_: base64::DecodeError) -> Self {
        TipguardError::Integrity
    }
}
