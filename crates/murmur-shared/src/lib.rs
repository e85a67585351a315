//! Cryptographic primitives and shared types for the murmur messaging engine.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod types;

pub use crypto::{decrypt_message, encrypt_message, SealedMessage};
pub use error::CryptoError;
pub use keys::{export_key, import_key, SymmetricKey};
pub use types::{ConversationId, MessageId, SortDirection, UserId, UserProfile};
