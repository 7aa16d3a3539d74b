//! Public-key sealing of submitted content.
//!
//! A submission is sealed for exactly one recipient certificate with no
//! sender signature attached. The engine is pluggable through
//! [`SealingEngine`]. [`OpenPgpEngine`] is the default and produces
//! ASCII-armored OpenPGP messages; [`AgeEngine`] is available for
//! recipients holding age X25519 keys.
//!
//! Failures are swallowed at this boundary: validation answers `false`, and
//! sealing answers `None`, with the engine error logged for operators.

use std::io::Write;
use std::str::FromStr;

use age::armor::{ArmoredWriter, Format};
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::types::PublicKeyTrait;
use pgp::{Deserializable, Message, SignedPublicKey};
use rand::rngs::OsRng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::error::Result;

/// Armor line opening an OpenPGP message.
pub const PGP_MESSAGE_MARKER: &str = "-----BEGIN PGP MESSAGE-----";

/// Armor line opening an age message.
pub const AGE_MESSAGE_MARKER: &str = "-----BEGIN AGE ENCRYPTED FILE-----";

/// Serialized padded envelopes are a multiple of this many bytes.
pub const PADDING_BLOCK_SIZE: usize = 1024;

/// Errors raised inside a sealing engine.
///
/// These never leave [`MessageSealer`].
#[derive(Debug, Error)]
pub enum SealingError {
    #[error("Invalid recipient certificate: {0}")]
    Certificate(String),

    #[error("Sealing failed: {0}")]
    Seal(String),
}

/// A public-key engine able to parse recipient certificates and seal bytes.
pub trait SealingEngine {
    type Certificate;

    /// Parse a recipient certificate.
    fn parse(&self, certificate: &[u8]) -> std::result::Result<Self::Certificate, SealingError>;

    /// Seal `plaintext` for `recipients` without signing. Returns armored bytes.
    fn seal(
        &self,
        recipients: &[Self::Certificate],
        plaintext: &[u8],
    ) -> std::result::Result<Vec<u8>, SealingError>;
}

/// OpenPGP sealing with ASCII armor.
///
/// Recipients are transferable public keys. The session key is wrapped for
/// every encryption-capable subkey of each recipient and the payload is
/// protected with AES-256 in a SEIPD v1 packet.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenPgpEngine;

impl SealingEngine for OpenPgpEngine {
    type Certificate = SignedPublicKey;

    fn parse(&self, certificate: &[u8]) -> std::result::Result<Self::Certificate, SealingError> {
        let text = std::str::from_utf8(certificate)
            .map_err(|_| SealingError::Certificate("Certificate is not UTF-8".to_string()))?;
        let (cert, _headers) = SignedPublicKey::from_string(text.trim())
            .map_err(|e| SealingError::Certificate(e.to_string()))?;
        cert.verify()
            .map_err(|e| SealingError::Certificate(format!("Bad self-signature: {}", e)))?;
        Ok(cert)
    }

    fn seal(
        &self,
        recipients: &[Self::Certificate],
        plaintext: &[u8],
    ) -> std::result::Result<Vec<u8>, SealingError> {
        let keys: Vec<_> = recipients
            .iter()
            .flat_map(|cert| cert.public_subkeys.iter())
            .filter(|subkey| subkey.is_encryption_key())
            .collect();
        if keys.is_empty() {
            return Err(SealingError::Seal(
                "Recipient has no encryption-capable subkey".to_string(),
            ));
        }

        let armored = Message::new_literal_bytes("", plaintext)
            .encrypt_to_keys_seipdv1(&mut OsRng, SymmetricKeyAlgorithm::AES256, &keys[..])
            .map_err(|e| SealingError::Seal(format!("Encryption failed: {}", e)))?
            .to_armored_string(Default::default())
            .map_err(|e| SealingError::Seal(format!("Failed to create armor: {}", e)))?;

        Ok(armored.into_bytes())
    }
}

/// Age X25519 sealing with ASCII armor.
#[derive(Debug, Default, Clone, Copy)]
pub struct AgeEngine;

impl SealingEngine for AgeEngine {
    type Certificate = age::x25519::Recipient;

    fn parse(&self, certificate: &[u8]) -> std::result::Result<Self::Certificate, SealingError> {
        let text = std::str::from_utf8(certificate)
            .map_err(|_| SealingError::Certificate("Certificate is not UTF-8".to_string()))?;
        age::x25519::Recipient::from_str(text.trim())
            .map_err(|e| SealingError::Certificate(e.to_string()))
    }

    fn seal(
        &self,
        recipients: &[Self::Certificate],
        plaintext: &[u8],
    ) -> std::result::Result<Vec<u8>, SealingError> {
        let encryptor = age::Encryptor::with_recipients(
            recipients.iter().map(|r| r as &dyn age::Recipient),
        )
        .map_err(|e| SealingError::Seal(format!("Failed to create encryptor: {}", e)))?;

        let mut sealed = Vec::new();
        let armored = ArmoredWriter::wrap_output(&mut sealed, Format::AsciiArmor)
            .map_err(|e| SealingError::Seal(format!("Failed to create armor: {}", e)))?;
        let mut writer = encryptor
            .wrap_output(armored)
            .map_err(|e| SealingError::Seal(format!("Failed to create writer: {}", e)))?;
        writer
            .write_all(plaintext)
            .map_err(|e| SealingError::Seal(format!("Encryption write failed: {}", e)))?;
        writer
            .finish()
            .and_then(|armor| armor.finish())
            .map_err(|e| SealingError::Seal(format!("Encryption finish failed: {}", e)))?;

        Ok(sealed)
    }
}

/// Seals plaintext for a single recipient key.
#[derive(Debug, Default, Clone)]
pub struct MessageSealer<E: SealingEngine = OpenPgpEngine> {
    engine: E,
}

impl MessageSealer<OpenPgpEngine> {
    pub fn openpgp() -> Self {
        Self {
            engine: OpenPgpEngine,
        }
    }
}

impl MessageSealer<AgeEngine> {
    pub fn age() -> Self {
        Self { engine: AgeEngine }
    }
}

impl<E: SealingEngine> MessageSealer<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    /// Whether `candidate` parses as a recipient certificate. Never errors.
    pub fn is_valid_key(&self, candidate: &str) -> bool {
        match self.engine.parse(candidate.as_bytes()) {
            Ok(_) => true,
            Err(err) => {
                debug!("Recipient key rejected: {}", err);
                false
            }
        }
    }

    /// Whether `candidate` parses and a trial seal with it succeeds.
    pub fn can_encrypt_with_key(&self, candidate: &str) -> bool {
        self.seal_bytes(b"test", candidate).is_some()
    }

    /// Seal text for `recipient_key`. Returns the armored message, or `None`
    /// on any failure.
    pub fn seal(&self, plaintext: &str, recipient_key: &str) -> Option<String> {
        let sealed = self.seal_bytes(plaintext.as_bytes(), recipient_key)?;
        match String::from_utf8(sealed) {
            Ok(armored) => Some(armored),
            Err(_) => {
                error!("Sealing engine produced non-text armor");
                None
            }
        }
    }

    /// Seal raw bytes for `recipient_key`. Returns the armored bytes, or
    /// `None` on any failure.
    pub fn seal_bytes(&self, data: &[u8], recipient_key: &str) -> Option<Vec<u8>> {
        let result = self
            .engine
            .parse(recipient_key.as_bytes())
            .and_then(|recipient| self.engine.seal(std::slice::from_ref(&recipient), data));
        match result {
            Ok(sealed) => Some(sealed),
            Err(err) => {
                error!("Error during sealing: {}", err);
                None
            }
        }
    }
}

/// Whether `value` already holds an armored sealed message.
pub fn is_sealed(value: &str) -> bool {
    value.contains(PGP_MESSAGE_MARKER) || value.contains(AGE_MESSAGE_MARKER)
}

#[derive(Serialize)]
struct PaddedEnvelope<'a> {
    value: &'a str,
    padding: String,
}

/// Wrap `value` in a `{value, padding}` JSON envelope whose serialized length
/// is an exact multiple of [`PADDING_BLOCK_SIZE`].
///
/// Padding is spaces, which serialize one byte each, so the second pass
/// lands on the block boundary.
pub fn pad(value: &str) -> Result<String> {
    let mut envelope = PaddedEnvelope {
        value,
        padding: String::new(),
    };
    for _ in 0..2 {
        let serialized = serde_json::to_string(&envelope)?;
        let remainder = serialized.len() % PADDING_BLOCK_SIZE;
        if remainder == 0 {
            return Ok(serialized);
        }
        let missing = PADDING_BLOCK_SIZE - remainder;
        envelope.padding.push_str(&" ".repeat(missing));
    }
    Ok(serde_json::to_string(&envelope)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use age::secrecy::ExposeSecret;
    use pgp::SignedSecretKey;
    use std::io::Read;
    use std::iter;

    const RECIPIENT_PUBLIC: &str = include_str!("../../tests/fixtures/recipient.pub.asc");
    const RECIPIENT_SECRET: &str = include_str!("../../tests/fixtures/recipient.sec.asc");

    fn open_pgp(armored: &str) -> Vec<u8> {
        let (secret, _) = SignedSecretKey::from_string(RECIPIENT_SECRET).unwrap();
        let (message, _) = Message::from_string(armored).unwrap();
        let (decrypted, _key_ids) = message.decrypt(String::new, &[&secret]).unwrap();
        decrypted.get_content().unwrap().unwrap()
    }

    fn keypair() -> (age::x25519::Identity, String) {
        let identity = age::x25519::Identity::generate();
        let public = identity.to_public().to_string();
        (identity, public)
    }

    fn open(identity: &age::x25519::Identity, armored: &[u8]) -> Vec<u8> {
        let decryptor =
            age::Decryptor::new(age::armor::ArmoredReader::new(armored)).unwrap();
        let mut reader = decryptor
            .decrypt(iter::once(identity as &dyn age::Identity))
            .unwrap();
        let mut plaintext = Vec::new();
        reader.read_to_end(&mut plaintext).unwrap();
        plaintext
    }

    #[test]
    fn test_openpgp_is_default_engine() {
        let sealer: MessageSealer = MessageSealer::default();
        assert!(sealer.is_valid_key(RECIPIENT_PUBLIC));
    }

    #[test]
    fn test_openpgp_certificate_accepted() {
        let sealer = MessageSealer::openpgp();
        assert!(sealer.is_valid_key(RECIPIENT_PUBLIC));
        assert!(sealer.can_encrypt_with_key(RECIPIENT_PUBLIC));
    }

    #[test]
    fn test_openpgp_rejects_garbage_and_secret_keys() {
        let sealer = MessageSealer::openpgp();
        assert!(!sealer.is_valid_key("not-a-key"));
        assert!(!sealer.is_valid_key(""));
        assert!(!sealer.is_valid_key(RECIPIENT_SECRET));
        assert!(sealer.seal("hello", "not-a-key").is_none());
    }

    #[test]
    fn test_openpgp_age_keys_are_not_certificates() {
        let (_, public) = keypair();
        assert!(!MessageSealer::openpgp().is_valid_key(&public));
    }

    #[test]
    fn test_openpgp_seal_produces_pgp_message() {
        let sealed = MessageSealer::openpgp()
            .seal("the drop is at noon", RECIPIENT_PUBLIC)
            .unwrap();
        assert!(sealed.starts_with(PGP_MESSAGE_MARKER));
        assert!(is_sealed(&sealed));
        assert!(!sealed.contains("the drop is at noon"));
        assert_eq!(open_pgp(&sealed), b"the drop is at noon");
    }

    #[test]
    fn test_openpgp_sealed_padding_round_trip() {
        let padded = pad("room 101").unwrap();
        let sealed = MessageSealer::openpgp().seal(&padded, RECIPIENT_PUBLIC).unwrap();
        let opened = open_pgp(&sealed);
        let parsed: serde_json::Value = serde_json::from_slice(&opened).unwrap();
        assert_eq!(parsed["value"], "room 101");
    }

    #[test]
    fn test_valid_key_accepted() {
        let (_, public) = keypair();
        let sealer = MessageSealer::age();
        assert!(sealer.is_valid_key(&public));
        assert!(sealer.can_encrypt_with_key(&public));
    }

    #[test]
    fn test_invalid_key_rejected_without_error() {
        let sealer = MessageSealer::age();
        assert!(!sealer.is_valid_key("not-a-key"));
        assert!(!sealer.is_valid_key(""));
        assert!(!sealer.can_encrypt_with_key("not-a-key"));
    }

    #[test]
    fn test_identity_is_not_a_recipient() {
        let (identity, _) = keypair();
        let sealer = MessageSealer::age();
        assert!(!sealer.is_valid_key(identity.to_string().expose_secret()));
    }

    #[test]
    fn test_seal_produces_armored_message() {
        let (identity, public) = keypair();
        let sealed = MessageSealer::age().seal("hello world", &public).unwrap();
        assert!(sealed.starts_with(AGE_MESSAGE_MARKER));
        assert!(is_sealed(&sealed));
        assert_eq!(open(&identity, sealed.as_bytes()), b"hello world");
    }

    #[test]
    fn test_seal_bytes_round_trip() {
        let (identity, public) = keypair();
        let sealed = MessageSealer::age().seal_bytes(b"\x00\x01raw", &public).unwrap();
        assert_eq!(open(&identity, &sealed), b"\x00\x01raw");
    }

    #[test]
    fn test_seal_with_bad_key_is_none() {
        assert!(MessageSealer::age().seal("hello", "not-a-key").is_none());
        assert!(MessageSealer::age().seal_bytes(b"hello", "not-a-key").is_none());
    }

    #[test]
    fn test_is_sealed_markers() {
        assert!(is_sealed(
            "-----BEGIN PGP MESSAGE-----\n\nbody\n-----END PGP MESSAGE-----"
        ));
        assert!(!is_sealed("plain text"));
    }

    #[test]
    fn test_padding_hits_block_multiples() {
        for len in [0usize, 1, 1023, 5000] {
            let value = "a".repeat(len);
            let padded = pad(&value).unwrap();
            assert_eq!(padded.len() % PADDING_BLOCK_SIZE, 0, "length {}", len);
            let parsed: serde_json::Value = serde_json::from_str(&padded).unwrap();
            assert_eq!(parsed["value"], value);
        }
    }

    #[test]
    fn test_padding_with_escaped_characters() {
        let value = "line\n\"quoted\"\t\u{1F512}";
        let padded = pad(value).unwrap();
        assert_eq!(padded.len() % PADDING_BLOCK_SIZE, 0);
        let parsed: serde_json::Value = serde_json::from_str(&padded).unwrap();
        assert_eq!(parsed["value"], value);
    }

    #[test]
    fn test_padding_hides_length_differences() {
        assert_eq!(pad("a").unwrap().len(), pad(&"a".repeat(900)).unwrap().len());
    }
}
