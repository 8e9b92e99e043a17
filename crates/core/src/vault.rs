//! Secret vault: at-rest field encryption, one-way secret hashing and token generation.
//!
//! Encrypted payloads are self-describing: `hex(nonce):hex(tag):hex(ciphertext)` under
//! AES-256-GCM with a fresh 96-bit nonce per call.

use std::fmt;
use std::sync::OnceLock;

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::errors::CoreError;

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("vault key is not usable: {0}")]
    Configuration(String),
    #[error("encrypted payload rejected: {0}")]
    Integrity(String),
}

impl From<VaultError> for CoreError {
    fn from(value: VaultError) -> Self {
        match value {
            VaultError::Configuration(message) => CoreError::Configuration(message),
            VaultError::Integrity(message) => CoreError::Integrity(message),
        }
    }
}

pub struct SecretVault {
    material: Option<SecretString>,
    key: OnceLock<Result<[u8; KEY_LENGTH], VaultError>>,
}

impl fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretVault")
            .field("configured", &self.material.is_some())
            .finish_non_exhaustive()
    }
}

impl SecretVault {
    /// Key material is parsed lazily on the first encrypt/decrypt, then cached.
    pub fn new(material: Option<SecretString>) -> Self {
        Self { material, key: OnceLock::new() }
    }

    pub fn is_configured(&self) -> bool {
        self.key().is_ok()
    }

    fn key(&self) -> Result<&[u8; KEY_LENGTH], VaultError> {
        self.key
            .get_or_init(|| match &self.material {
                Some(material) => parse_key(material.expose_secret()),
                None => Err(VaultError::Configuration("no encryption key configured".to_string())),
            })
            .as_ref()
            .map_err(|error| error.clone())
    }

    fn cipher(&self) -> Result<Aes256Gcm, VaultError> {
        let key = self.key()?;
        Aes256Gcm::new_from_slice(key).map_err(|error| VaultError::Configuration(error.to_string()))
    }

    /// Empty input passes through unchanged so optional fields need no special casing.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(nonce, b"", &mut buffer)
            .map_err(|_| VaultError::Integrity("encryption failed".to_string()))?;

        Ok(format!("{}:{}:{}", hex::encode(nonce_bytes), hex::encode(tag), hex::encode(buffer)))
    }

    pub fn decrypt(&self, payload: &str) -> Result<String, VaultError> {
        if payload.is_empty() {
            return Ok(String::new());
        }
        let cipher = self.cipher()?;

        let mut parts = payload.split(':');
        let (Some(nonce_hex), Some(tag_hex), Some(body_hex), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(VaultError::Integrity("payload must have three parts".to_string()));
        };

        let nonce_bytes = decode_part(nonce_hex, "nonce")?;
        let tag_bytes = decode_part(tag_hex, "tag")?;
        let mut buffer = decode_part(body_hex, "ciphertext")?;
        if nonce_bytes.len() != NONCE_LENGTH {
            return Err(VaultError::Integrity("nonce has wrong length".to_string()));
        }
        if tag_bytes.len() != TAG_LENGTH {
            return Err(VaultError::Integrity("tag has wrong length".to_string()));
        }

        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&nonce_bytes),
                b"",
                &mut buffer,
                Tag::from_slice(&tag_bytes),
            )
            .map_err(|_| VaultError::Integrity("authentication tag mismatch".to_string()))?;

        String::from_utf8(buffer)
            .map_err(|_| VaultError::Integrity("plaintext is not valid utf-8".to_string()))
    }
}

fn decode_part(raw: &str, name: &str) -> Result<Vec<u8>, VaultError> {
    hex::decode(raw).map_err(|_| VaultError::Integrity(format!("{name} is not valid hex")))
}

/// Accepts 64 hex characters or standard base64, either decoding to exactly 32 bytes.
pub fn parse_key(raw: &str) -> Result<[u8; KEY_LENGTH], VaultError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(VaultError::Configuration("encryption key is empty".to_string()));
    }

    let decoded = if trimmed.len() == KEY_LENGTH * 2 && trimmed.bytes().all(|b| b.is_ascii_hexdigit())
    {
        hex::decode(trimmed).map_err(|error| VaultError::Configuration(error.to_string()))?
    } else {
        BASE64.decode(trimmed).map_err(|_| {
            VaultError::Configuration("encryption key must be 64 hex chars or base64".to_string())
        })?
    };

    <[u8; KEY_LENGTH]>::try_from(decoded.as_slice()).map_err(|_| {
        VaultError::Configuration(format!(
            "encryption key must decode to {KEY_LENGTH} bytes, got {}",
            decoded.len()
        ))
    })
}

/// SHA-256 hex digest, used for credentials that are only ever compared.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

pub fn verify_secret(secret: &str, digest: &str) -> bool {
    let computed = hash_secret(secret);
    computed.as_bytes().ct_eq(digest.trim().to_ascii_lowercase().as_bytes()).into()
}

pub fn generate_token(byte_length: usize) -> String {
    let mut bytes = vec![0u8; byte_length];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
