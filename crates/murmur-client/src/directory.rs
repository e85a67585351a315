//! Conversation discovery: find-or-create with a peer, and the live,
//! recency-sorted list of the viewer's conversations.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use tracing::{debug, info};

use murmur_shared::constants::ENCRYPTED_PREVIEW_PLACEHOLDER;
use murmur_shared::crypto::decrypt_message;
use murmur_shared::keys::SymmetricKey;
use murmur_shared::types::{ConversationId, UserId, UserProfile};
use murmur_store::{ConversationDoc, DocumentStore, NewConversation};

use crate::error::{ClientError, Result};
use crate::key_cache::KeyCache;

/// Preview of the most recent message, as shown in the conversation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastMessage {
    /// Legacy plaintext preview.
    Plain(String),
    Decrypted(String),
    /// Encrypted preview that could not be decrypted locally.
    Encrypted,
}

impl LastMessage {
    pub fn text(&self) -> &str {
        match self {
            LastMessage::Plain(text) | LastMessage::Decrypted(text) => text.as_str(),
            LastMessage::Encrypted => ENCRYPTED_PREVIEW_PLACEHOLDER,
        }
    }
}

/// A conversation as seen by one viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Vec<UserId>,
    pub profiles: BTreeMap<UserId, UserProfile>,
    /// Exported key as stored.
    pub encryption_key: Option<String>,
    pub last_message: Option<LastMessage>,
    pub last_message_at: Option<DateTime<Utc>>,
    /// The viewer's own unread counter.
    pub unread_count: i64,
}

impl Conversation {
    /// Build the viewer's view of `doc`, caching its key and decrypting the
    /// preview when possible.
    pub fn from_doc(doc: ConversationDoc, viewer: &UserId, keys: &KeyCache) -> Self {
        let key = match &doc.encryption_key {
            Some(exported) => keys.import(&doc.id, exported).ok(),
            None => keys.get(&doc.id),
        };
        let last_message = preview(&doc, key.as_deref());
        let unread_count = doc.unread_for(viewer);

        Self {
            id: doc.id,
            participants: doc.participants,
            profiles: doc.participant_profiles,
            encryption_key: doc.encryption_key,
            last_message,
            last_message_at: doc.last_message_at,
            unread_count,
        }
    }

    pub fn peer_id(&self, viewer: &UserId) -> Option<&UserId> {
        self.participants.iter().find(|p| *p != viewer)
    }

    pub fn peer(&self, viewer: &UserId) -> Option<&UserProfile> {
        self.peer_id(viewer).and_then(|id| self.profiles.get(id))
    }

    /// Display name of the other participant.
    pub fn title(&self, viewer: &UserId) -> &str {
        self.peer(viewer)
            .map(UserProfile::label)
            .unwrap_or(murmur_shared::constants::UNKNOWN_USER_LABEL)
    }

    pub fn preview(&self) -> Option<&str> {
        self.last_message.as_ref().map(LastMessage::text)
    }

    pub fn has_unread(&self) -> bool {
        self.unread_count > 0
    }
}

fn preview(doc: &ConversationDoc, key: Option<&SymmetricKey>) -> Option<LastMessage> {
    let text = doc.last_message.as_deref()?;
    if !doc.last_message_encrypted {
        return Some(LastMessage::Plain(text.to_string()));
    }

    let (Some(key), Some(nonce)) = (key, doc.last_message_nonce.as_deref()) else {
        return Some(LastMessage::Encrypted);
    };
    match decrypt_message(text, key, nonce) {
        Ok(plaintext) => Some(LastMessage::Decrypted(plaintext)),
        Err(e) => {
            debug!(conversation = %doc.id, error = %e, "Preview could not be decrypted");
            Some(LastMessage::Encrypted)
        }
    }
}

/// Most recent activity first; conversations without a message go last.
/// Stable, so ties keep store order.
pub fn sort_conversations(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| match (a.last_message_at, b.last_message_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

pub struct ConversationDirectory<S> {
    store: Arc<S>,
    keys: Arc<KeyCache>,
    me: UserProfile,
}

impl<S: DocumentStore> ConversationDirectory<S> {
    pub fn new(store: Arc<S>, keys: Arc<KeyCache>, me: UserProfile) -> Self {
        Self { store, keys, me }
    }

    pub fn me(&self) -> &UserProfile {
        &self.me
    }

    /// Return the conversation between the viewer and `other`, creating it
    /// with a fresh key when none exists.
    ///
    /// The lookup and the create are not atomic: two clients resolving the
    /// same pair at the same moment can both create.  Later calls pick the
    /// earliest-created match.
    pub async fn resolve_or_create(&self, other: &UserProfile) -> Result<Conversation> {
        if other.id == self.me.id {
            return Err(ClientError::SelfConversation);
        }

        let existing = self.store.find_conversations(&self.me.id).await?;
        if let Some(doc) = existing.into_iter().find(|c| c.has_participant(&other.id)) {
            debug!(conversation = %doc.id, peer = %other.id, "Found existing conversation");
            return Ok(Conversation::from_doc(doc, &self.me.id, &self.keys));
        }

        let key = SymmetricKey::generate();
        let exported = key.export();
        let doc = self
            .store
            .create_conversation(NewConversation::between(&self.me, other, exported))
            .await?;
        self.keys.insert(doc.id.clone(), key);

        info!(conversation = %doc.id, peer = %other.id, "Created conversation");
        Ok(Conversation::from_doc(doc, &self.me.id, &self.keys))
    }

    /// The cached key for `conversation`, importing its stored key if needed.
    pub fn ensure_key(&self, conversation: &Conversation) -> Result<Arc<SymmetricKey>> {
        if let Some(key) = self.keys.get(&conversation.id) {
            return Ok(key);
        }
        match conversation.encryption_key.as_deref() {
            Some(exported) => Ok(self.keys.import(&conversation.id, exported)?),
            None => Err(ClientError::NoKey(conversation.id.clone())),
        }
    }

    /// Live, recency-sorted list of the viewer's conversations.  Each
    /// snapshot caches newly seen keys and decrypts previews.
    pub fn live_conversations(
        &self,
    ) -> impl Stream<Item = Result<Vec<Conversation>>> + Send + Unpin + 'static {
        let keys = Arc::clone(&self.keys);
        let viewer = self.me.id.clone();

        self.store
            .subscribe_conversations(&viewer)
            .map(move |snapshot| -> Result<Vec<Conversation>> {
                let docs = snapshot?;
                let mut conversations: Vec<Conversation> = docs
                    .into_iter()
                    .map(|doc| Conversation::from_doc(doc, &viewer, &keys))
                    .collect();
                sort_conversations(&mut conversations);
                debug!(count = conversations.len(), "Conversation list updated");
                Ok(conversations)
            })
    }
}
