use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

use crate::constants::{NONCE_SIZE, TAG_SIZE};
use crate::error::CryptoError;
use crate::keys::SymmetricKey;

/// Ciphertext and nonce of one message, both base64 for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub ciphertext: String,
    pub nonce: String,
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Fresh random nonce per call; the nonce travels next to the ciphertext
// because message ordering is assigned by the store, not by this side.
pub fn encrypt_message(plaintext: &str, key: &SymmetricKey) -> Result<SealedMessage, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(SealedMessage {
        ciphertext: STANDARD.encode(ciphertext),
        nonce: STANDARD.encode(nonce_bytes),
    })
}

pub fn decrypt_message(
    ciphertext: &str,
    key: &SymmetricKey,
    nonce: &str,
) -> Result<String, CryptoError> {
    let nonce_bytes = STANDARD
        .decode(nonce)
        .map_err(|_| CryptoError::DecryptionFailed("malformed nonce"))?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed("nonce length mismatch"));
    }

    let data = STANDARD
        .decode(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("malformed ciphertext"))?;
    if data.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed("ciphertext shorter than tag"));
    }

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), data.as_slice())
        .map_err(|_| CryptoError::DecryptionFailed("authentication failed"))?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed("plaintext is not UTF-8"))
}
