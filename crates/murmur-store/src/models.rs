//! Documents persisted in the store and the write shapes used to create and
//! patch them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use murmur_shared::types::{ConversationId, MessageId, UserId, UserProfile};

use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// Write-time sentinels
// ---------------------------------------------------------------------------

/// A timestamp field value at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampValue {
    /// Resolved by the store when the write lands; strictly increasing.
    ServerTimestamp,
    At(DateTime<Utc>),
}

/// A counter field write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Set(i64),
    /// Applied atomically by the store, never read-modify-write.
    Increment(i64),
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A two-party conversation as stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationDoc {
    pub id: ConversationId,
    /// Exactly two participant ids, in creation order.
    pub participants: Vec<UserId>,
    pub participant_profiles: BTreeMap<UserId, UserProfile>,
    /// Exported symmetric key; immutable after creation.
    pub encryption_key: Option<String>,
    pub last_message: Option<String>,
    pub last_message_nonce: Option<String>,
    pub last_message_encrypted: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    /// Unread counter per participant.
    pub unread_counts: BTreeMap<UserId, i64>,
    pub created_at: DateTime<Utc>,
}

impl ConversationDoc {
    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.iter().any(|p| p == user)
    }

    pub fn unread_for(&self, user: &UserId) -> i64 {
        self.unread_counts.get(user).copied().unwrap_or(0)
    }
}

/// Fields of a conversation supplied by its creator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub participants: Vec<UserId>,
    pub participant_profiles: BTreeMap<UserId, UserProfile>,
    pub encryption_key: String,
}

impl NewConversation {
    pub fn between(me: &UserProfile, other: &UserProfile, encryption_key: String) -> Self {
        let mut participant_profiles = BTreeMap::new();
        participant_profiles.insert(me.id.clone(), me.clone());
        participant_profiles.insert(other.id.clone(), other.clone());
        Self {
            participants: vec![me.id.clone(), other.id.clone()],
            participant_profiles,
            encryption_key,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self.participants.as_slice() {
            [a, b] if a != b => {}
            _ => {
                return Err(StoreError::InvalidDocument(
                    "a conversation needs exactly two distinct participants".into(),
                ))
            }
        }
        if let Some(missing) = self
            .participants
            .iter()
            .find(|p| !self.participant_profiles.contains_key(*p))
        {
            return Err(StoreError::InvalidDocument(format!(
                "no profile for participant {missing}"
            )));
        }
        Ok(())
    }
}

/// Partial update of a conversation; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationPatch {
    pub last_message: Option<String>,
    pub last_message_nonce: Option<String>,
    pub last_message_encrypted: Option<bool>,
    pub last_message_at: Option<TimestampValue>,
    pub unread: Vec<(UserId, Counter)>,
}

impl ConversationPatch {
    pub fn is_empty(&self) -> bool {
        self.last_message.is_none()
            && self.last_message_nonce.is_none()
            && self.last_message_encrypted.is_none()
            && self.last_message_at.is_none()
            && self.unread.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single message record.  `text` is ciphertext when `encrypted` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageDoc {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
    pub nonce: Option<String>,
    pub encrypted: bool,
    /// Server-assigned; only absent on legacy records.
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
    pub nonce: Option<String>,
    pub encrypted: bool,
    pub timestamp: TimestampValue,
}

impl NewMessage {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.encrypted && self.nonce.as_deref().map_or(true, str::is_empty) {
            return Err(StoreError::InvalidDocument(
                "encrypted message without a nonce".into(),
            ));
        }
        Ok(())
    }
}
