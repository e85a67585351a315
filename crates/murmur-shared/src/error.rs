use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Key format error: exported key is not valid base64")]
    KeyFormat,

    #[error("Key import error: expected {expected} key bytes, got {actual}")]
    KeyImport { expected: usize, actual: usize },

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: {0}")]
    DecryptionFailed(&'static str),
}
