//! The per-installation device salt.
//!
//! Exactly one salt file exists per vault directory. It is published with a
//! hard link from a fully written temp file, so concurrent first runs agree
//! on a single complete salt: whichever link lands first wins and the others
//! read it. Between reads the file is left with no permissions at all; each
//! read briefly restores owner-read and revokes it again on every exit path.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::crypto::kdf::MIN_SALT_LENGTH;
use crate::error::{Result, TipguardError};
use crate::fs::set_mode;

/// File name of the device salt inside the vault directory.
pub const DEVICE_SALT_FILE_NAME: &str = "_device_salt.txt";

const UNLOCKED_MODE: u32 = 0o400;
const LOCKED_MODE: u32 = 0o000;

/// Serializes unlock/read/relock within this process.
static ACCESS: Mutex<()> = Mutex::new(());

/// Random salt binding vault keys to this installation.
pub struct DeviceSalt {
    bytes: Zeroizing<Vec<u8>>,
}

impl DeviceSalt {
    /// Path of the salt file inside `dir`.
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(DEVICE_SALT_FILE_NAME)
    }

    /// Load the salt from `dir`, creating it on first use.
    ///
    /// A stored salt whose length differs from `expected_len` is used anyway
    /// with a warning, so existing installs keep their keys.
    pub fn summon(dir: &Path, expected_len: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = Self::path(dir);
        if !path.exists() && Self::create(&path, expected_len)? {
            info!(path = %path.display(), "Created device salt");
        }

        let bytes = Self::read_locked(&path)?;
        if bytes.len() < MIN_SALT_LENGTH {
            return Err(TipguardError::Configuration(format!(
                "Device salt at {} is too short ({} bytes)",
                path.display(),
                bytes.len()
            )));
        }
        if bytes.len() != expected_len {
            warn!(
                path = %path.display(),
                actual = bytes.len(),
                expected = expected_len,
                "Device salt length differs from the configured length"
            );
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Publish a new salt at `path`. Returns false if another writer got there first.
    fn create(path: &Path, len: usize) -> Result<bool> {
        let mut salt = Zeroizing::new(vec![0u8; len]);
        getrandom::getrandom(&mut salt).map_err(|e| {
            TipguardError::Configuration(format!("System RNG unavailable: {}", e))
        })?;
        let encoded = Zeroizing::new(URL_SAFE_NO_PAD.encode(salt.as_slice()));

        let temp_path = path.with_file_name(format!(
            "{}.{}.{}.tmp",
            DEVICE_SALT_FILE_NAME,
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let published = Self::write_new(&temp_path, encoded.as_bytes())
            .and_then(|_| match fs::hard_link(&temp_path, path) {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
                Err(err) => Err(err),
            });
        let _ = fs::remove_file(&temp_path);
        Ok(published?)
    }

    fn write_new(path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(contents)?;
        file.sync_all()
    }

    fn read_locked(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
        let _access = ACCESS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set_mode(path, UNLOCKED_MODE)?;
        let _relock = Relock { path };
        let encoded = Zeroizing::new(fs::read_to_string(path)?);
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim().trim_end_matches('='))
            .map_err(|_| {
                TipguardError::Configuration(format!(
                    "Device salt at {} is not valid base64",
                    path.display()
                ))
            })?;
        Ok(Zeroizing::new(bytes))
    }
}

impl std::fmt::Debug for DeviceSalt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSalt")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Revokes access to the salt file when dropped.
struct Relock<'a> {
    path: &'a Path,
}

impl Drop for Relock<'_> {
    fn drop(&mut self) {
        if let Err(err) = set_mode(self.path, LOCKED_MODE) {
            warn!(path = %self.path.display(), "Failed to revoke device salt access: {}", err);
        }
    }
}
