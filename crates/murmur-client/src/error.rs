use thiserror::Error;

use murmur_shared::error::CryptoError;
use murmur_shared::types::ConversationId;
use murmur_store::StoreError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Sending requires the conversation key to be cached first.
    #[error("No encryption key available for conversation {0}")]
    NoKey(ConversationId),

    #[error("Cannot send an empty message")]
    EmptyMessage,

    #[error("Cannot start a conversation with yourself")]
    SelfConversation,

    #[error("No conversation selected")]
    NoConversationSelected,

    /// A later `select` started before this one finished.
    #[error("Selection of conversation {0} was superseded")]
    SelectionSuperseded(ConversationId),
}

impl ClientError {
    /// True when the store reported a missing composite index, which points
    /// at a schema problem rather than a transient fault.
    pub fn is_missing_index(&self) -> bool {
        matches!(self, ClientError::Store(e) if e.is_missing_index())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
