use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, TipguardError};
use crate::vault::device_salt::DEVICE_SALT_FILE_NAME;

/// Extension of every file in the vault directory.
pub const ENTRY_EXTENSION: &str = "txt";

const MAX_NAME_LENGTH: usize = 128;

/// Validated name of an ordinary vault entry.
///
/// Names starting with `_` are reserved for bootstrap files, so an entry can
/// never shadow the device salt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryName(String);

impl EntryName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() || name.len() > MAX_NAME_LENGTH {
            return Err(TipguardError::Validation(format!(
                "Entry name must be 1-{} characters",
                MAX_NAME_LENGTH
            )));
        }
        if name.starts_with('_') || name.starts_with('.') {
            return Err(TipguardError::Validation(format!(
                "Entry name '{}' uses a reserved prefix",
                name
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(TipguardError::Validation(format!(
                "Entry name '{}' may only contain letters, digits, '_', '-' and '.'",
                name
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// KDF domain the entry's ciphertext is bound to.
    pub fn domain(&self) -> String {
        format!("vault_entry:{}", self.0)
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.0, ENTRY_EXTENSION)
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for EntryName {
    type Err = TipguardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// A file found in the vault directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEntry {
    /// The device salt. Stored in the clear and never decrypted.
    BootstrapSalt { path: PathBuf },
    /// A named secret encrypted under its own derived key.
    Secret { name: EntryName, path: PathBuf },
}

impl VaultEntry {
    /// Classify a directory entry by file name. Unrelated files yield `None`.
    pub fn classify(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        if file_name == DEVICE_SALT_FILE_NAME {
            return Some(VaultEntry::BootstrapSalt {
                path: path.to_path_buf(),
            });
        }
        let stem = file_name.strip_suffix(&format!(".{}", ENTRY_EXTENSION))?;
        let name = EntryName::new(stem).ok()?;
        Some(VaultEntry::Secret {
            name,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        match self {
            VaultEntry::BootstrapSalt { path } | VaultEntry::Secret { path, .. } => path,
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        matches!(self, VaultEntry::BootstrapSalt { .. })
    }
}
