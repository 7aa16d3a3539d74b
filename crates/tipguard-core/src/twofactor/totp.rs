//! RFC 6238 time-based one-time passcodes (HMAC-SHA1, 30 s steps, 6 digits).
//!
//! Code generation, windowed comparison and `otpauth://` URIs come from
//! `totp-rs`; this module pins the parameters and owns secret handling.

use totp_rs::{Algorithm, Secret, TOTP};
use zeroize::Zeroizing;

use crate::crypto::random_bytes;
use crate::error::{Result, TipguardError};

/// Digits in a code.
pub const DIGITS: usize = 6;
/// Seconds per time-step.
pub const STEP_SECS: u64 = 30;
/// Shared secret size: 160 bits, 32 base32 characters.
pub const SECRET_LEN: usize = 20;

/// Fresh random shared secret in base32.
pub fn generate_secret() -> Result<Zeroizing<String>> {
    let bytes = Zeroizing::new(random_bytes::<SECRET_LEN>()?);
    match &Secret::Raw(bytes.to_vec()).to_encoded() {
        Secret::Encoded(encoded) => Ok(Zeroizing::new(encoded.clone())),
        Secret::Raw(_) => Err(TipguardError::Validation(
            "Secret could not be encoded".to_string(),
        )),
    }
}

/// Decode a base32 secret, ignoring case, whitespace and padding.
pub fn decode_secret(secret: &str) -> Result<Zeroizing<Vec<u8>>> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let decoded = Secret::Encoded(normalized)
        .to_bytes()
        .map_err(|_| TipguardError::Validation("Secret is not valid base32".to_string()))?;
    if decoded.is_empty() {
        return Err(TipguardError::Validation("Secret is empty".to_string()));
    }
    Ok(Zeroizing::new(decoded))
}

/// Time-step containing `unix_secs`.
pub fn time_step(unix_secs: u64) -> u64 {
    unix_secs / STEP_SECS
}

fn generator(secret: &[u8], window: u64) -> TOTP {
    let skew = u8::try_from(window).unwrap_or(u8::MAX);
    TOTP::new_unchecked(
        Algorithm::SHA1,
        DIGITS,
        skew,
        STEP_SECS,
        secret.to_vec(),
        None,
        String::new(),
    )
}

/// The code for `step`.
pub fn code_at_step(secret: &[u8], step: u64) -> Result<String> {
    code_at(secret, step.saturating_mul(STEP_SECS))
}

/// The code valid at `unix_secs`.
pub fn code_at(secret: &[u8], unix_secs: u64) -> Result<String> {
    if secret.is_empty() {
        return Err(TipguardError::Validation("Secret is empty".to_string()));
    }
    Ok(generator(secret, 0).generate(unix_secs))
}

/// Whether `candidate` matches any step within `window` steps of the one
/// containing `unix_secs`.
///
/// A candidate that is not exactly [`DIGITS`] ASCII digits never matches.
pub fn verify(secret: &[u8], candidate: &str, unix_secs: u64, window: u64) -> bool {
    if !is_well_formed(candidate) || secret.is_empty() {
        return false;
    }
    generator(secret, window).check(candidate, unix_secs)
}

/// Whether `candidate` has the shape of a code.
pub fn is_well_formed(candidate: &str) -> bool {
    candidate.len() == DIGITS && candidate.bytes().all(|b| b.is_ascii_digit())
}

/// `otpauth://` URI for authenticator apps.
///
/// Fails when the secret is shorter than 128 bits or when `account` or
/// `issuer` contains a colon.
pub fn provisioning_uri(secret: &str, account: &str, issuer: &str) -> Result<String> {
    let key = decode_secret(secret)?;
    let totp = TOTP::new(
        Algorithm::SHA1,
        DIGITS,
        1,
        STEP_SECS,
        key.to_vec(),
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|e| TipguardError::Validation(format!("Cannot build provisioning URI: {}", e)))?;
    Ok(totp.get_url())
}
