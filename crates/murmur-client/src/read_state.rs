//! Per-participant unread counters.

use std::sync::Arc;

use tracing::debug;

use murmur_shared::types::{ConversationId, UserId};
use murmur_store::{ConversationPatch, Counter, DocumentStore};

use crate::directory::Conversation;
use crate::error::Result;

pub struct ReadStateTracker<S> {
    store: Arc<S>,
    viewer: UserId,
}

impl<S: DocumentStore> ReadStateTracker<S> {
    pub fn new(store: Arc<S>, viewer: UserId) -> Self {
        Self { store, viewer }
    }

    /// Reset the viewer's unread counter for `conversation_id`.
    pub async fn mark_read(&self, conversation_id: &ConversationId) -> Result<()> {
        let patch = ConversationPatch {
            unread: vec![(self.viewer.clone(), Counter::Set(0))],
            ..Default::default()
        };
        self.store.update_conversation(conversation_id, patch).await?;
        debug!(conversation = %conversation_id, "Marked conversation read");
        Ok(())
    }
}

/// Counter writes for a new message: every participant except the sender
/// gets an atomic increment.
pub fn unread_increments(participants: &[UserId], sender: &UserId) -> Vec<(UserId, Counter)> {
    participants
        .iter()
        .filter(|p| *p != sender)
        .map(|p| (p.clone(), Counter::Increment(1)))
        .collect()
}

/// Zero the unread count of `conversation_id` in a local list.  Returns
/// whether the conversation was present.
pub fn clear_local_unread(conversations: &mut [Conversation], conversation_id: &ConversationId) -> bool {
    match conversations.iter_mut().find(|c| c.id == *conversation_id) {
        Some(conversation) => {
            conversation.unread_count = 0;
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use murmur_shared::types::UserProfile;
    use murmur_store::{NewConversation, SqliteStore, StoreOptions};

    use super::*;

    #[test]
    fn increments_skip_the_sender() {
        let participants = vec![UserId::from("alice"), UserId::from("bob")];
        let writes = unread_increments(&participants, &UserId::from("alice"));
        assert_eq!(writes, vec![(UserId::from("bob"), Counter::Increment(1))]);
    }

    #[test]
    fn clear_local_unread_zeroes_only_the_target() {
        let conversation = |id: &str, unread| Conversation {
            id: ConversationId::from(id),
            participants: vec![],
            profiles: BTreeMap::new(),
            encryption_key: None,
            last_message: None,
            last_message_at: None,
            unread_count: unread,
        };
        let mut list = vec![conversation("a", 4), conversation("b", 2)];

        assert!(clear_local_unread(&mut list, &ConversationId::from("b")));
        assert_eq!(list[0].unread_count, 4);
        assert_eq!(list[1].unread_count, 0);
        assert!(!clear_local_unread(&mut list, &ConversationId::from("zzz")));
    }

    #[tokio::test]
    async fn mark_read_resets_only_the_viewer() {
        let store = Arc::new(SqliteStore::open_in_memory(StoreOptions::default()).unwrap());
        let alice = UserProfile::new("alice");
        let bob = UserProfile::new("bob");
        let doc = store
            .create_conversation(NewConversation::between(&alice, &bob, "k".into()))
            .await
            .unwrap();

        let bump = ConversationPatch {
            unread: vec![
                (alice.id.clone(), Counter::Increment(2)),
                (bob.id.clone(), Counter::Increment(5)),
            ],
            ..Default::default()
        };
        store.update_conversation(&doc.id, bump).await.unwrap();

        let tracker = ReadStateTracker::new(Arc::clone(&store), bob.id.clone());
        tracker.mark_read(&doc.id).await.unwrap();
        // Idempotent.
        tracker.mark_read(&doc.id).await.unwrap();

        let stored = store.find_conversations(&bob.id).await.unwrap().remove(0);
        assert_eq!(stored.unread_for(&bob.id), 0);
        assert_eq!(stored.unread_for(&alice.id), 2);
    }
}
