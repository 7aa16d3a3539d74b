//! Exit codes and environment variable names.

/// Process exit codes. 1 is any unclassified failure and 2 is left to clap
/// for usage errors.
pub mod exit_codes {
    /// Resource not found (config, vault entry, key file).
    pub const NOT_FOUND: i32 = 3;

    /// Invalid user input or arguments.
    pub const INVALID_INPUT: i32 = 4;

    /// Authentication failed (recipient key unusable, throttled).
    pub const AUTH_FAILED: i32 = 5;

    /// Integrity check failed (tampered token, wrong key or scope).
    pub const INTEGRITY_FAILED: i32 = 6;

    /// Required key material missing or malformed.
    pub const CONFIGURATION: i32 = 7;

    /// Vault files, logs or serialized data could not be read or written.
    pub const STORAGE: i32 = 8;
}

/// Environment variable holding the vault admin secret for non-interactive use.
pub const ENV_ADMIN_SECRET: &str = "TIPGUARD_ADMIN_SECRET";

/// Environment variable selecting the log filter.
pub const ENV_LOG: &str = "TIPGUARD_LOG";

/// Environment variable overriding the config file location.
pub const ENV_CONFIG: &str = "TIPGUARD_CONFIG";

/// Default length of generated admin secrets.
pub const DEFAULT_ADMIN_SECRET_LEN: usize = 32;
