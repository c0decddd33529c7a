//! AES-256-GCM codec for individual string fields.
//!
//! Ciphertext format: `hex(iv):hex(auth_tag):hex(ciphertext)` with a
//! 16-byte IV and a 16-byte tag, so a stored value can be recognised as
//! encrypted by its shape alone.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Environment variable holding the hex-encoded 32-byte key.
pub const ENCRYPTION_KEY_ENV: &str = "FUNDGUARD_ENCRYPTION_KEY";

/// Fallback variable name used by older deployments.
pub const LEGACY_ENCRYPTION_KEY_ENV: &str = "ENCRYPTION_KEY";

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Errors raised by the field codec.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// No key configured. Fatal at startup.
    #[error("encryption key is not set ({ENCRYPTION_KEY_ENV})")]
    MissingKey,

    /// Key present but not 32 bytes of hex. Fatal at startup.
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    /// The cipher primitive refused to encrypt.
    #[error("encryption failed")]
    Encrypt,

    /// A structurally valid ciphertext failed to decode or authenticate.
    #[error("decryption failed: {0}")]
    Decrypt(&'static str),

    /// Value is not in `iv:tag:ciphertext` form.
    #[error("value is not an encrypted field")]
    NotEncrypted,
}

/// Symmetric cipher for sensitive columns.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm16,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").field("key", &"<redacted>").finish()
    }
}

impl FieldCipher {
    /// Build a cipher from a hex-encoded 32-byte key.
    pub fn from_hex_key(hex_key: &str) -> Result<Self, CryptoError> {
        let hex_key = hex_key.trim();
        if hex_key.is_empty() {
            return Err(CryptoError::MissingKey);
        }
        let key = hex::decode(hex_key)
            .map_err(|e| CryptoError::InvalidKey(format!("not valid hex: {e}")))?;
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm16::new_from_slice(&key)
            .map_err(|_| CryptoError::InvalidKey("rejected by cipher".to_string()))?;
        Ok(Self { cipher })
    }

    /// Build a cipher from the process environment.
    pub fn from_env() -> Result<Self, CryptoError> {
        let key = std::env::var(ENCRYPTION_KEY_ENV)
            .or_else(|_| std::env::var(LEGACY_ENCRYPTION_KEY_ENV))
            .map_err(|_| CryptoError::MissingKey)?;
        Self::from_hex_key(&key)
    }

    /// Generate a fresh random key, hex encoded.
    pub fn generate_hex_key() -> String {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        hex::encode(key)
    }

    /// Encrypt a field value. Absent or empty input has no ciphertext.
    pub fn encrypt(&self, plaintext: Option<&str>) -> Result<Option<String>, CryptoError> {
        match plaintext {
            None | Some("") => Ok(None),
            Some(value) => self.encrypt_str(value).map(Some),
        }
    }

    fn encrypt_str(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| CryptoError::Encrypt)?;

        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(buffer)
        ))
    }

    /// Decrypt a stored value.
    ///
    /// Values that are not shaped like ciphertext are legacy plaintext and
    /// come back unchanged. A well-formed ciphertext that fails to
    /// authenticate is logged and the stored value is returned as is.
    pub fn decrypt(&self, stored: Option<&str>) -> Option<String> {
        let stored = stored?;
        if !Self::is_encrypted(Some(stored)) {
            return Some(stored.to_string());
        }
        match self.try_decrypt(stored) {
            Ok(plaintext) => Some(plaintext),
            Err(e) => {
                tracing::error!(error = %e, "Failed to decrypt field, returning stored value");
                Some(stored.to_string())
            }
        }
    }

    /// Strict decryption: any failure is returned to the caller.
    pub fn try_decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        let (iv, tag, ciphertext) = split_parts(stored).ok_or(CryptoError::NotEncrypted)?;

        let iv = hex::decode(iv).map_err(|_| CryptoError::Decrypt("iv is not hex"))?;
        let tag = hex::decode(tag).map_err(|_| CryptoError::Decrypt("tag is not hex"))?;
        let mut buffer =
            hex::decode(ciphertext).map_err(|_| CryptoError::Decrypt("ciphertext is not hex"))?;

        self.cipher
            .decrypt_in_place_detached(
                Nonce::<U16>::from_slice(&iv),
                b"",
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| CryptoError::Decrypt("authentication failed"))?;

        String::from_utf8(buffer).map_err(|_| CryptoError::Decrypt("plaintext is not utf-8"))
    }

    /// Structural check only; never attempts decryption.
    pub fn is_encrypted(value: Option<&str>) -> bool {
        value.and_then(split_parts).is_some()
    }

    /// Deterministic one-way digest for equality lookups on encrypted columns.
    pub fn hash_for_search(value: &str) -> String {
        hex::encode(Sha256::digest(value.as_bytes()))
    }
}

fn split_parts(value: &str) -> Option<(&str, &str, &str)> {
    let mut parts = value.split(':');
    let iv = parts.next()?;
    let tag = parts.next()?;
    let ciphertext = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let well_formed = iv.len() == IV_LEN * 2
        && tag.len() == TAG_LEN * 2
        && !ciphertext.is_empty()
        && ciphertext.len() % 2 == 0
        && [iv, tag, ciphertext]
            .iter()
            .all(|p| p.bytes().all(|b| b.is_ascii_hexdigit()));
    well_formed.then_some((iv, tag, ciphertext))
}
