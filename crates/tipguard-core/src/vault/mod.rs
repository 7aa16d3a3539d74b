//! Secrets vault for infrastructure keys.
//!
//! The vault turns an administrator secret into a keyed BLAKE3 hasher once
//! per process:
//!
//! ```text
//! seed  = Argon2id(pack(app_name, "app_admin_secret", admin_secret), device_salt)
//! root  = BLAKE3-keyed(seed) <- pack_padded(commitment)
//! key_i = XOF(root <- pack_padded(domain, aad.., "big", size))
//! ```
//!
//! The admin secret is zeroed as soon as the seed exists, and every derived
//! key lives in a [`Zeroizing`] buffer so it is wiped on every exit path.
//! Construct one [`SecretVault`] at startup and pass it to whatever needs it;
//! the Argon2 step is deliberately slow.
//!
//! Ciphertexts are base64url:
//!
//! ```text
//! version 0x81 (1) | timestamp (8) | salt (32) | ChaCha20-Poly1305 ciphertext + tag
//! ```
//!
//! The per-message salt feeds [`SecretVault::derive_key`], which yields the
//! nonce, associated data and cipher key in one 76-byte draw.

pub mod device_salt;
pub mod entry;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::Utc;
use tracing::{debug, info};
use zeroize::{Zeroize, Zeroizing};

use crate::config::CryptoSettings;
use crate::crypto::canonical;
use crate::crypto::kdf::KdfParams;
use crate::crypto::random_bytes;
use crate::crypto::token::{self, Header, MaxAge};
use crate::error::{Result, TipguardError};
use crate::fs::write_atomic;

pub use device_salt::{DeviceSalt, DEVICE_SALT_FILE_NAME};
pub use entry::{EntryName, VaultEntry};

/// Version byte of vault ciphertexts.
pub const VAULT_TOKEN_VERSION: u8 = 0x81;

/// Associated-data tag prepended by the database field helpers.
pub const DATABASE_FIELD_TAG: &[u8] = b"database_field";

const CIPHER_DOMAIN: &[u8] = b"chacha20poly1305:derived_nonce_aad_key:salt256";
const ADMIN_SECRET_TAG: &[u8] = b"app_admin_secret";
const COMMITMENT_TAG: &[u8] = b"app_admin_secret_commitment";
const SIZE_TAG: &[u8] = b"big";

const SEED_LEN: usize = 32;
const MESSAGE_SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const DERIVED_AAD_LEN: usize = 32;
const CIPHER_KEY_LEN: usize = 32;
const DERIVED_LEN: usize = NONCE_LEN + DERIVED_AAD_LEN + CIPHER_KEY_LEN;
const TAG_LEN: usize = 16;

/// Where the vault lives and how hard its root derivation is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultOptions {
    pub dir: PathBuf,
    pub app_name: String,
    pub device_salt_len: usize,
    pub kdf: KdfParams,
}

impl VaultOptions {
    pub fn from_settings(settings: &CryptoSettings) -> Self {
        Self {
            dir: settings.vault_dir(),
            app_name: settings.vault.app_name.clone(),
            device_salt_len: settings.vault.device_salt_len,
            kdf: settings.kdf.vault,
        }
    }
}

/// Derives keys for infrastructure secrets and encrypts them.
pub struct SecretVault {
    root: blake3::Hasher,
    dir: PathBuf,
}

impl SecretVault {
    /// Derive the vault root from `admin_secret`, creating the device salt on
    /// first run. `admin_secret` is zeroed before returning, on success or
    /// failure.
    pub fn open(options: &VaultOptions, admin_secret: &mut [u8]) -> Result<Self> {
        let result = Self::derive_root(options, admin_secret);
        admin_secret.zeroize();
        result
    }

    fn derive_root(options: &VaultOptions, admin_secret: &[u8]) -> Result<Self> {
        if admin_secret.is_empty() {
            return Err(TipguardError::Configuration(
                "Admin secret is empty".to_string(),
            ));
        }
        let salt = DeviceSalt::summon(&options.dir, options.device_salt_len)?;

        let app_name = options.app_name.as_bytes();
        let password = Zeroizing::new(canonical::pack(&[app_name, ADMIN_SECRET_TAG, admin_secret]));
        let mut seed = Zeroizing::new([0u8; SEED_LEN]);
        options
            .kdf
            .derive_into(&password, salt.as_bytes(), &mut seed[..])?;

        let mut root = blake3::Hasher::new_keyed(&seed);
        root.update(&canonical::pack_padded(
            &[COMMITMENT_TAG, app_name, &(salt.len() as u64).to_be_bytes()],
            blake3::BLOCK_LEN,
        ));

        info!(dir = %options.dir.display(), "Vault key derivation ready");
        Ok(Self {
            root,
            dir: options.dir.clone(),
        })
    }

    /// Directory holding the device salt and stored entries.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Derive `size` bytes for `domain` and `aad`.
    ///
    /// Deterministic for a given admin secret and device salt.
    pub fn derive_key(&self, domain: &[u8], aad: &[&[u8]], size: usize) -> Zeroizing<Vec<u8>> {
        let size_bytes = (size as u64).to_be_bytes();
        let mut parts: Vec<&[u8]> = Vec::with_capacity(aad.len() + 3);
        parts.push(domain);
        parts.extend_from_slice(aad);
        parts.push(SIZE_TAG);
        parts.push(&size_bytes);

        let mut hasher = self.root.clone();
        hasher.update(&canonical::pack_padded(&parts, blake3::BLOCK_LEN));
        let mut out = Zeroizing::new(vec![0u8; size]);
        hasher.finalize_xof().fill(&mut out);
        out
    }

    /// Encrypt `data` under a key derived from `domain` and `aad`.
    pub fn encrypt(&self, data: &[u8], domain: &[u8], aad: &[&[u8]]) -> Result<String> {
        self.encrypt_at(data, domain, aad, unix_now())
    }

    pub(crate) fn encrypt_at(
        &self,
        data: &[u8],
        domain: &[u8],
        aad: &[&[u8]],
        timestamp: u64,
    ) -> Result<String> {
        let header = Header {
            version: VAULT_TOKEN_VERSION,
            timestamp,
        }
        .to_bytes();
        let salt = random_bytes::<MESSAGE_SALT_LEN>()?;

        let (cipher, nonce, associated) = self.message_cipher(domain, aad, &salt, &header);
        let ciphertext = cipher.encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: data,
                aad: &associated,
            },
        )?;

        let mut raw = Vec::with_capacity(Header::LEN + MESSAGE_SALT_LEN + ciphertext.len());
        raw.extend_from_slice(&header);
        raw.extend_from_slice(&salt);
        raw.extend_from_slice(&ciphertext);
        Ok(token::encode(&raw))
    }

    /// Decrypt a vault ciphertext. With `ttl`, tokens older than it fail.
    ///
    /// Any failure is [`TipguardError::Integrity`].
    pub fn decrypt(
        &self,
        token: &str,
        domain: &[u8],
        aad: &[&[u8]],
        ttl: Option<Duration>,
    ) -> Result<Zeroizing<Vec<u8>>> {
        self.decrypt_at(token, domain, aad, ttl, unix_now())
    }

    pub(crate) fn decrypt_at(
        &self,
        token: &str,
        domain: &[u8],
        aad: &[&[u8]],
        ttl: Option<Duration>,
        now: u64,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let raw = token::decode(token)?;
        let header = Header::parse(&raw, VAULT_TOKEN_VERSION)?;
        if raw.len() < Header::LEN + MESSAGE_SALT_LEN + TAG_LEN {
            return Err(TipguardError::Integrity);
        }
        if let Some(ttl) = ttl {
            MaxAge {
                ttl_secs: ttl.as_secs(),
                now,
            }
            .check(header.timestamp)?;
        }

        let (header_bytes, body) = raw.split_at(Header::LEN);
        let (salt, ciphertext) = body.split_at(MESSAGE_SALT_LEN);
        let (cipher, nonce, associated) = self.message_cipher(domain, aad, salt, header_bytes);
        let plaintext = cipher.decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: ciphertext,
                aad: &associated,
            },
        )?;
        Ok(Zeroizing::new(plaintext))
    }

    /// [`SecretVault::encrypt`] with the database field tag leading `aad`.
    pub fn encrypt_field(&self, data: &[u8], domain: &[u8], aad: &[&[u8]]) -> Result<String> {
        self.encrypt(data, domain, &field_aad(aad))
    }

    pub fn decrypt_field(
        &self,
        token: &str,
        domain: &[u8],
        aad: &[&[u8]],
        ttl: Option<Duration>,
    ) -> Result<Zeroizing<Vec<u8>>> {
        self.decrypt(token, domain, &field_aad(aad), ttl)
    }

    /// Encrypt `secret` and write it to `<name>.txt` in the vault directory.
    pub fn store_entry(&self, name: &EntryName, secret: &[u8]) -> Result<PathBuf> {
        let ciphertext = self.encrypt(secret, name.domain().as_bytes(), &[])?;
        let path = self.dir.join(name.file_name());
        write_atomic(&path, ciphertext.as_bytes())?;
        info!(entry = %name, "Stored vault entry");
        Ok(path)
    }

    /// Read and decrypt a stored entry. A missing entry is `None`.
    pub fn load_entry(&self, name: &EntryName) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let path = self.dir.join(name.file_name());
        if !path.exists() {
            debug!(entry = %name, "Vault entry not found");
            return Ok(None);
        }
        let ciphertext = fs::read_to_string(&path)?;
        self.decrypt(&ciphertext, name.domain().as_bytes(), &[], None)
            .map(Some)
    }

    /// Every recognised file in the vault directory, sorted by path.
    pub fn entries(&self) -> Result<Vec<VaultEntry>> {
        list_entries(&self.dir)
    }

    fn message_cipher(
        &self,
        domain: &[u8],
        aad: &[&[u8]],
        salt: &[u8],
        header: &[u8],
    ) -> (ChaCha20Poly1305, [u8; NONCE_LEN], Zeroizing<Vec<u8>>) {
        let mut inputs: Vec<&[u8]> = Vec::with_capacity(aad.len() + 2);
        inputs.push(domain);
        inputs.push(salt);
        inputs.extend_from_slice(aad);
        let derived = self.derive_key(CIPHER_DOMAIN, &inputs, DERIVED_LEN);

        let (nonce_bytes, rest) = derived.split_at(NONCE_LEN);
        let (derived_aad, key) = rest.split_at(DERIVED_AAD_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);

        let mut associated = Zeroizing::new(Vec::with_capacity(DERIVED_AAD_LEN + header.len()));
        associated.extend_from_slice(derived_aad);
        associated.extend_from_slice(header);

        debug_assert_eq!(key.len(), CIPHER_KEY_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        (cipher, nonce, associated)
    }
}

impl std::fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretVault")
            .field("root", &"[REDACTED]")
            .field("dir", &self.dir)
            .finish()
    }
}

fn field_aad<'a>(aad: &[&'a [u8]]) -> Vec<&'a [u8]> {
    let mut tagged = Vec::with_capacity(aad.len() + 1);
    tagged.push(DATABASE_FIELD_TAG);
    tagged.extend_from_slice(aad);
    tagged
}

fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Every recognised file in `dir`, sorted by path.
///
/// Needs no admin secret: names and the device salt are not confidential.
pub fn list_entries(dir: &Path) -> Result<Vec<VaultEntry>> {
    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(dir)? {
        if let Some(entry) = VaultEntry::classify(&dir_entry?.path()) {
            entries.push(entry);
        }
    }
    entries.sort_by(|a, b| a.path().cmp(b.path()));
    Ok(entries)
}
