use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tipguard_core::config::CryptoSettings;

use crate::constants::ENV_CONFIG;

/// Contents of `config.toml`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TipguardConfig {
    #[serde(default)]
    pub crypto: CryptoSettings,
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(xdg_config_dir()?.join("config.toml"))
}

pub fn read_config(path: &Path) -> anyhow::Result<TipguardConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
    toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))
}

/// Settings from the config file (if any) overlaid with the environment.
///
/// An explicit path must exist; the default location is optional.
pub fn load_settings(explicit: Option<&str>) -> anyhow::Result<CryptoSettings> {
    let explicit = explicit
        .map(str::to_string)
        .or_else(|| std::env::var(ENV_CONFIG).ok().filter(|v| !v.trim().is_empty()));
    let mut settings = match explicit {
        Some(path) => read_config(Path::new(&path))?.crypto,
        None => {
            let path = default_config_path()?;
            if path.exists() {
                read_config(&path)?.crypto
            } else {
                CryptoSettings::default()
            }
        }
    };
    settings.apply_env(|name| std::env::var(name).ok());
    Ok(settings)
}

pub fn xdg_config_dir() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var("XDG_CONFIG_HOME") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value).join("tipguard"));
        }
    }
    Ok(home_dir()?.join(".config").join("tipguard"))
}

fn home_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| anyhow::anyhow!("HOME is not set; cannot resolve default paths"))?;
    Ok(PathBuf::from(home))
}
