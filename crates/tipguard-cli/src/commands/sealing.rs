use std::path::Path;

use tipguard_core::crypto::{pad, MessageSealer};
use tracing::debug;

use crate::errors::CliError;
use crate::security::read_stdin;

fn read_key_file(path: &str) -> anyhow::Result<String> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(CliError::not_found(
            format!("Key file {} not found", path.display()),
            "Hint: Pass the path of a file holding the recipient public key.",
        )
        .into());
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read key file {}: {}", path.display(), e))?;
    Ok(contents.trim().to_string())
}

/// Age recipients are bech32 strings with a fixed prefix; anything else is
/// treated as an OpenPGP certificate.
fn is_age_recipient(key: &str) -> bool {
    key.starts_with("age1")
}

fn key_checks(key: &str) -> (bool, bool) {
    if is_age_recipient(key) {
        let sealer = MessageSealer::age();
        (sealer.is_valid_key(key), sealer.can_encrypt_with_key(key))
    } else {
        let sealer = MessageSealer::openpgp();
        (sealer.is_valid_key(key), sealer.can_encrypt_with_key(key))
    }
}

fn seal_for(payload: &str, key: &str) -> Option<String> {
    if is_age_recipient(key) {
        debug!("Sealing for age recipient");
        MessageSealer::age().seal(payload, key)
    } else {
        debug!("Sealing for OpenPGP recipient");
        MessageSealer::openpgp().seal(payload, key)
    }
}

pub fn handle_check_key(file: &str, quiet: bool) -> anyhow::Result<()> {
    let key = read_key_file(file)?;
    let (valid, usable) = key_checks(&key);
    if !valid {
        return Err(CliError::auth_failed_with_hint(
            "Recipient key is not valid",
            "Hint: Expected an armored OpenPGP public key or an age X25519 public key (age1...).",
        )
        .into());
    }
    if !usable {
        return Err(CliError::auth_failed_with_hint(
            "Recipient key cannot be used for encryption",
            "Hint: Generate a new key pair and try again.",
        )
        .into());
    }
    if !quiet {
        println!("Recipient key is valid and usable");
    }
    Ok(())
}

pub fn handle_seal(key_file: &str, no_pad: bool) -> anyhow::Result<()> {
    let key = read_key_file(key_file)?;
    let input = read_stdin()?;
    let text = std::str::from_utf8(&input)
        .map_err(|_| CliError::invalid_input("Input must be UTF-8 text"))?;
    let payload = if no_pad {
        text.to_string()
    } else {
        pad(text).map_err(CliError::from)?
    };
    let sealed = seal_for(&payload, &key).ok_or_else(|| {
        CliError::auth_failed_with_hint(
            "Sealing failed",
            "Hint: Run `tipguard check-key` on the recipient key.",
        )
    })?;
    print!("{}", sealed);
    Ok(())
}
