//! Symmetric encryption and one-way hashing for PHI values.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use phi_query_core::{content_hash, Error, Result};
use rand::RngCore;
use sha2::Sha256;

/// Fixed salt for deriving a key from a passphrase.
const KDF_SALT: &[u8] = b"hipaa_salt_2024";
/// PBKDF2 rounds.
const KDF_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Where the cipher key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// The configured secret was already 32 bytes of key material.
    Raw,
    /// The configured secret was a passphrase run through PBKDF2.
    Derived,
}

/// AES-256-GCM encryption of PHI values.
///
/// Tokens are url-safe base64 of `nonce || ciphertext || tag`. A fresh random
/// nonce is drawn per call, so encrypting the same value twice gives
/// different tokens.
pub struct EncryptionService {
    cipher: Aes256Gcm,
    key_source: KeySource,
}

impl EncryptionService {
    /// Build the service from the configured secret.
    ///
    /// 64 hex characters, or url-safe base64 decoding to exactly 32 bytes, is
    /// used directly. Any other non-empty secret is stretched with
    /// PBKDF2-HMAC-SHA256. An empty secret is a configuration error.
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::configuration("Encryption key must be provided"));
        }

        let (key, key_source) = match parse_raw_key(secret) {
            Some(key) => (key, KeySource::Raw),
            None => (derive_key(secret), KeySource::Derived),
        };

        tracing::debug!(key_source = ?key_source, "Encryption service initialized");

        Ok(Self {
            cipher: Aes256Gcm::new(&key.into()),
            key_source,
        })
    }

    pub fn key_source(&self) -> KeySource {
        self.key_source
    }

    /// Encrypt a value. The empty string passes through unencrypted.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::internal(format!("Encryption failed: {}", e)))?;

        // Prepend nonce to ciphertext
        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);
        Ok(URL_SAFE.encode(token))
    }

    /// Decrypt a token produced by [`encrypt`](Self::encrypt) under the same key.
    /// The empty string passes through.
    pub fn decrypt(&self, token: &str) -> Result<String> {
        if token.is_empty() {
            return Ok(String::new());
        }

        let data = URL_SAFE.decode(token.as_bytes()).map_err(|e| {
            tracing::error!(error = %e, "decryption_failed");
            Error::decryption("token is not valid base64")
        })?;

        if data.len() < NONCE_LEN + TAG_LEN {
            tracing::error!(len = data.len(), "decryption_failed");
            return Err(Error::decryption("token is truncated"));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                tracing::error!("decryption_failed");
                Error::decryption("token was tampered with or encrypted under another key")
            })?;

        String::from_utf8(plaintext).map_err(|e| Error::decryption(format!("Invalid UTF-8: {}", e)))
    }
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService")
            .field("key_source", &self.key_source)
            .finish_non_exhaustive()
    }
}

/// One-way SHA-256 digest of a PHI value as 64 lowercase hex characters.
pub fn hash_phi(value: &str) -> String {
    content_hash(value)
}

fn parse_raw_key(secret: &str) -> Option<[u8; 32]> {
    if secret.len() == 64 {
        if let Ok(bytes) = hex::decode(secret) {
            return bytes.try_into().ok();
        }
    }
    URL_SAFE
        .decode(secret.as_bytes())
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
}

fn derive_key(passphrase: &str) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
    key
}
