//! Per-conversation symmetric keys and their transport encoding.
//!
//! A key travels through the document store only in its exported form:
//! the raw 32 bytes as standard base64.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;

use crate::constants::SYMMETRIC_KEY_SIZE;
use crate::error::CryptoError;

/// 256-bit authenticated-encryption key.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; SYMMETRIC_KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::KeyImport {
                expected: SYMMETRIC_KEY_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }

    pub fn export(&self) -> String {
        export_key(self)
    }

    pub fn import(encoded: &str) -> Result<Self, CryptoError> {
        import_key(encoded)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

pub fn export_key(key: &SymmetricKey) -> String {
    STANDARD.encode(key.0)
}

pub fn import_key(encoded: &str) -> Result<SymmetricKey, CryptoError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| CryptoError::KeyFormat)?;
    SymmetricKey::from_bytes(&bytes)
}
