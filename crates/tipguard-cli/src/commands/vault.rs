use std::io::Write;

use tipguard_core::config::CryptoSettings;
use tipguard_core::vault::{self, DeviceSalt, EntryName, SecretVault, VaultEntry, VaultOptions};
use tracing::info;

use crate::errors::CliError;
use crate::security::{read_admin_secret, read_stdin};

fn open_vault(settings: &CryptoSettings) -> anyhow::Result<SecretVault> {
    let options = VaultOptions::from_settings(settings);
    let mut admin_secret = read_admin_secret()?;
    info!(dir = %options.dir.display(), "Deriving vault keys");
    Ok(SecretVault::open(&options, &mut admin_secret).map_err(CliError::from)?)
}

fn entry_name(name: &str) -> anyhow::Result<EntryName> {
    Ok(EntryName::new(name).map_err(CliError::from)?)
}

pub fn handle_init(settings: &CryptoSettings, quiet: bool) -> anyhow::Result<()> {
    let vault = open_vault(settings)?;
    if !quiet {
        println!(
            "Vault ready; device salt at {}",
            DeviceSalt::path(vault.dir()).display()
        );
    }
    Ok(())
}

pub fn handle_put(settings: &CryptoSettings, name: &str, quiet: bool) -> anyhow::Result<()> {
    let name = entry_name(name)?;
    let secret = read_stdin()?;
    let secret = secret.strip_suffix(b"\n").unwrap_or(&secret);
    if secret.is_empty() {
        return Err(CliError::invalid_input("Refusing to store an empty secret").into());
    }
    let vault = open_vault(settings)?;
    let path = vault.store_entry(&name, secret).map_err(CliError::from)?;
    if !quiet {
        println!("Stored {} at {}", name, path.display());
    }
    Ok(())
}

pub fn handle_get(settings: &CryptoSettings, name: &str) -> anyhow::Result<()> {
    let name = entry_name(name)?;
    let vault = open_vault(settings)?;
    let secret = vault
        .load_entry(&name)
        .map_err(CliError::from)?
        .ok_or_else(|| {
            CliError::not_found(
                format!("Vault entry \"{}\" not found", name),
                "Hint: Run `tipguard vault-list` to see stored entries.",
            )
        })?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&secret)?;
    stdout.write_all(b"\n")?;
    Ok(())
}

pub fn handle_list(settings: &CryptoSettings) -> anyhow::Result<()> {
    let options = VaultOptions::from_settings(settings);
    if !options.dir.exists() {
        return Err(CliError::not_found(
            format!("Vault directory {} does not exist", options.dir.display()),
            "Hint: Run `tipguard vault-init` first.",
        )
        .into());
    }
    let entries = vault::list_entries(&options.dir).map_err(CliError::from)?;
    for entry in entries {
        match entry {
            VaultEntry::BootstrapSalt { path } => println!("(device salt)\t{}", path.display()),
            VaultEntry::Secret { name, .. } => println!("{}", name),
        }
    }
    Ok(())
}
