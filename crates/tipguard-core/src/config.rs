//! Process configuration for the cryptographic core.
//!
//! Settings are plain serde structs so the CLI (or a web front end) can load
//! them from TOML, then apply environment overrides. Key material is kept as
//! base64 text here and decoded only when a component is constructed, at
//! which point a missing or malformed key is a [`TipguardError::Configuration`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::crypto::kdf::KdfParams;
use crate::crypto::key::SymmetricKey;
use crate::error::{Result, TipguardError};

/// Environment variable holding the base64 master secret.
pub const ENV_ENCRYPTION_KEY: &str = "ENCRYPTION_KEY";
/// Environment variable holding the optional base64 session transport key.
pub const ENV_SESSION_KEY: &str = "SESSION_ENCRYPTION_KEY";
/// Environment variable overriding the vault directory.
pub const ENV_VAULT_DIR: &str = "TIPGUARD_VAULT_DIR";

/// Default application name, used in the vault directory and KDF inputs.
pub const DEFAULT_APP_NAME: &str = "tipguard";
/// Default device salt length in bytes.
pub const DEFAULT_DEVICE_SALT_LEN: usize = 32;
/// Default session lifetime: 31 days.
pub const DEFAULT_SESSION_LIFETIME_SECS: u64 = 31 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptoSettings {
    /// Base64 master secret for field encryption
    pub encryption_key: Option<String>,
    /// Base64 session transport key; absence disables secure sessions
    pub session_key: Option<String>,
    #[serde(default)]
    pub vault: VaultSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub kdf: KdfSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    pub app_name: String,
    pub dir: Option<String>,
    pub device_salt_len: usize,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            dir: None,
            device_salt_len: DEFAULT_DEVICE_SALT_LEN,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub lifetime_seconds: u64,
    pub cookie_name: String,
    pub cookie_domain: Option<String>,
    pub cookie_path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
    pub partitioned: bool,
    pub refresh_each_request: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            lifetime_seconds: DEFAULT_SESSION_LIFETIME_SECS,
            cookie_name: "session".to_string(),
            cookie_domain: None,
            cookie_path: "/".to_string(),
            secure: true,
            http_only: true,
            same_site: Some(SameSite::Lax),
            partitioned: false,
            refresh_each_request: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfSettings {
    pub field: KdfParams,
    pub vault: KdfParams,
}

impl Default for KdfSettings {
    fn default() -> Self {
        Self {
            field: KdfParams::FIELD,
            vault: KdfParams::VAULT,
        }
    }
}

impl CryptoSettings {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env(|name| std::env::var(name).ok());
        settings
    }

    /// Overlay values from `lookup`. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(value) = present(ENV_ENCRYPTION_KEY) {
            self.encryption_key = Some(value);
        }
        if let Some(value) = present(ENV_SESSION_KEY) {
            self.session_key = Some(value);
        }
        if let Some(value) = present(ENV_VAULT_DIR) {
            self.vault.dir = Some(value);
        }
    }

    /// Decode the master secret. Missing or malformed is fatal.
    pub fn master_key(&self) -> Result<SymmetricKey> {
        let encoded = self.encryption_key.as_deref().ok_or_else(|| {
            TipguardError::Configuration(format!(
                "Encryption key not found; set {}",
                ENV_ENCRYPTION_KEY
            ))
        })?;
        SymmetricKey::from_base64(encoded)
    }

    /// Decode the session transport key, if configured.
    pub fn session_key(&self) -> Result<Option<SymmetricKey>> {
        self.session_key
            .as_deref()
            .map(SymmetricKey::from_base64)
            .transpose()
    }

    /// Directory holding the device salt and vault entries.
    pub fn vault_dir(&self) -> PathBuf {
        match &self.vault.dir {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from(&self.vault.app_name)
                .join("crypto")
                .join("_app_secrets"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_missing_master_key_is_configuration_error() {
        let settings = CryptoSettings::default();
        let err = settings.master_key().unwrap_err();
        assert!(matches!(err, TipguardError::Configuration(_)));
        assert!(err.to_string().contains(ENV_ENCRYPTION_KEY));
    }

    #[test]
    fn test_env_overrides() {
        let key = SymmetricKey::generate().unwrap().to_base64();
        let mut settings = CryptoSettings::default();
        settings.apply_env(lookup(&[
            (ENV_ENCRYPTION_KEY, key.as_str()),
            (ENV_VAULT_DIR, "/tmp/vault"),
            (ENV_SESSION_KEY, "  "),
        ]));
        assert!(settings.master_key().is_ok());
        assert_eq!(settings.vault_dir(), PathBuf::from("/tmp/vault"));
        assert!(settings.session_key().unwrap().is_none());
    }

    #[test]
    fn test_default_vault_dir_pattern() {
        let settings = CryptoSettings::default();
        assert_eq!(
            settings.vault_dir(),
            PathBuf::from("tipguard/crypto/_app_secrets")
        );
    }

    #[test]
    fn test_malformed_session_key_is_configuration_error() {
        let settings = CryptoSettings {
            session_key: Some("short".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            settings.session_key(),
            Err(TipguardError::Configuration(_))
        ));
    }

    #[test]
    fn test_deserialize_partial_settings() {
        let json = r#"{"encryption_key": null, "session": {"lifetime_seconds": 60, "cookie_name": "s", "cookie_domain": null, "cookie_path": "/", "secure": false, "http_only": true, "same_site": "Strict", "refresh_each_request": false}}"#;
        let settings: CryptoSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.session.lifetime_seconds, 60);
        assert_eq!(settings.session.same_site, Some(SameSite::Strict));
        assert_eq!(settings.vault.device_salt_len, DEFAULT_DEVICE_SALT_LEN);
        assert_eq!(settings.kdf.vault, KdfParams::VAULT);
    }
}
