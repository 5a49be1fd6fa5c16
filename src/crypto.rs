//! Symmetric encryption helpers built on Fernet tokens.
//!
//! Keys are generated fresh for each use and wrapped in [`SecretKey`], whose
//! `Debug` output is redacted so a key cannot leak through logging.

use std::fmt;
use std::io::Read;

use fernet::Fernet;
use flate2::read::GzDecoder;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key: expected 32 url-safe base64 encoded bytes")]
    InvalidKey,
    #[error("Decryption failed: wrong key or corrupted data")]
    Decrypt,
    #[error("Ciphertext is not a valid token")]
    MalformedToken,
    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),
}

/// A Fernet key in its url-safe base64 text form.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(String);

impl SecretKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        SecretKey(Fernet::generate_key())
    }

    /// Wrap an externally supplied key, validating its form.
    pub fn parse(raw: &str) -> Result<Self, CryptoError> {
        let raw = raw.trim();
        Fernet::new(raw).ok_or(CryptoError::InvalidKey)?;
        Ok(SecretKey(raw.to_string()))
    }

    /// The key text. Only hand this to the secret delivery channel.
    pub fn expose(&self) -> &str {
        &self.0
    }

    fn cipher(&self) -> Result<Fernet, CryptoError> {
        Fernet::new(&self.0).ok_or(CryptoError::InvalidKey)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Encrypt `data` into a Fernet token (ASCII bytes).
pub fn encrypt(data: &[u8], key: &SecretKey) -> Result<Vec<u8>, CryptoError> {
    Ok(key.cipher()?.encrypt(data).into_bytes())
}

/// Decrypt a Fernet token. A wrong key fails authentication instead of
/// producing garbage plaintext.
pub fn decrypt(token: &[u8], key: &SecretKey) -> Result<Vec<u8>, CryptoError> {
    let token = std::str::from_utf8(token).map_err(|_| CryptoError::MalformedToken)?;
    key.cipher()?
        .decrypt(token.trim())
        .map_err(|_| CryptoError::Decrypt)
}

/// Decompress a gzip buffer.
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}
