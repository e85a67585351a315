/// ChaCha20-Poly1305 nonce size in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Symmetric key size in bytes (256 bits)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Shown in the conversation list when a last-message preview cannot be decrypted
pub const ENCRYPTED_PREVIEW_PLACEHOLDER: &str = "🔒 Encrypted message";

/// Shown in a timeline for a message that could not be decrypted
pub const UNDECRYPTABLE_PLACEHOLDER: &str = "[Encrypted message]";

/// Body of a legacy plaintext record that carries no text
pub const EMPTY_BODY_PLACEHOLDER: &str = "No message content";

/// Label used when a participant has neither a display name nor an email
pub const UNKNOWN_USER_LABEL: &str = "Unknown User";
