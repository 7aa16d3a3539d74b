use std::io::Write;

use tipguard_core::config::CryptoSettings;
use tipguard_core::crypto::{FieldCodec, FieldSalt, FieldScope};

use crate::errors::CliError;
use crate::security::read_stdin;

fn codec(settings: &CryptoSettings) -> anyhow::Result<FieldCodec> {
    Ok(FieldCodec::from_settings(settings).map_err(CliError::from)?)
}

fn parse_salt(salt: Option<&str>) -> anyhow::Result<Option<FieldSalt>> {
    Ok(salt
        .map(FieldSalt::from_base64)
        .transpose()
        .map_err(CliError::from)?)
}

pub fn handle_encrypt(
    settings: &CryptoSettings,
    value: Option<String>,
    domain: Option<&str>,
    salt: Option<&str>,
) -> anyhow::Result<()> {
    let codec = codec(settings)?;
    let salt = parse_salt(salt)?;
    let scope = match (domain, salt.as_ref()) {
        (Some(domain), Some(salt)) => Some(FieldScope::new(domain, salt)),
        _ => None,
    };
    let plaintext = match value {
        Some(value) => zeroize::Zeroizing::new(value.into_bytes()),
        None => read_stdin()?,
    };
    let token = codec.encrypt(&plaintext, scope).map_err(CliError::from)?;
    println!("{}", token);
    Ok(())
}

pub fn handle_decrypt(
    settings: &CryptoSettings,
    token: &str,
    domain: Option<&str>,
    salt: Option<&str>,
) -> anyhow::Result<()> {
    let codec = codec(settings)?;
    let salt = parse_salt(salt)?;
    let scope = match (domain, salt.as_ref()) {
        (Some(domain), Some(salt)) => Some(FieldScope::new(domain, salt)),
        _ => None,
    };
    let plaintext = zeroize::Zeroizing::new(codec.decrypt(token, scope).map_err(CliError::from)?);
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&plaintext)?;
    stdout.write_all(b"\n")?;
    Ok(())
}
