use std::io::{IsTerminal, Read};

use dialoguer::Password;
use zeroize::Zeroizing;

use crate::constants::ENV_ADMIN_SECRET;
use crate::errors::CliError;

const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const PUNCTUATION: &[u8] = b"!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Random password with at least one upper, lower, digit and punctuation character.
pub fn generate_admin_secret(length: usize) -> anyhow::Result<Zeroizing<String>> {
    if length < 4 {
        return Err(CliError::invalid_input("Admin secret length must be at least 4").into());
    }
    let all: Vec<u8> = [UPPERCASE, LOWERCASE, DIGITS, PUNCTUATION].concat();

    let mut chars = Zeroizing::new(Vec::with_capacity(length));
    for class in [UPPERCASE, LOWERCASE, DIGITS, PUNCTUATION] {
        chars.push(class[random_index(class.len())?]);
    }
    while chars.len() < length {
        chars.push(all[random_index(all.len())?]);
    }
    for i in (1..chars.len()).rev() {
        let j = random_index(i + 1)?;
        chars.swap(i, j);
    }

    let secret = String::from_utf8(chars.to_vec())
        .map_err(|_| anyhow::anyhow!("Generated secret is not ASCII"))?;
    Ok(Zeroizing::new(secret))
}

/// Uniform index below `bound` from the OS RNG.
fn random_index(bound: usize) -> anyhow::Result<usize> {
    let bound = u32::try_from(bound).map_err(|_| anyhow::anyhow!("Bound too large"))?;
    let zone = u32::MAX - (u32::MAX % bound);
    loop {
        let mut bytes = [0u8; 4];
        getrandom::getrandom(&mut bytes)
            .map_err(|e| anyhow::anyhow!("Failed to read random bytes: {}", e))?;
        let value = u32::from_le_bytes(bytes);
        if value < zone {
            return Ok((value % bound) as usize);
        }
    }
}

/// Admin secret from the environment, or prompted on a terminal.
pub fn read_admin_secret() -> anyhow::Result<Zeroizing<Vec<u8>>> {
    if let Ok(value) = std::env::var(ENV_ADMIN_SECRET) {
        if !value.is_empty() {
            return Ok(Zeroizing::new(value.into_bytes()));
        }
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::invalid_input(format!(
            "No admin secret provided; set {} or run interactively",
            ENV_ADMIN_SECRET
        ))
        .into());
    }
    let secret = Password::new()
        .with_prompt("Admin secret")
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to read admin secret: {}", e))?;
    Ok(Zeroizing::new(secret.into_bytes()))
}

/// All of stdin, for piped secrets and plaintext.
pub fn read_stdin() -> anyhow::Result<Zeroizing<Vec<u8>>> {
    let mut buffer = Zeroizing::new(Vec::new());
    std::io::stdin()
        .read_to_end(&mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to read stdin: {}", e))?;
    Ok(buffer)
}
