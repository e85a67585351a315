//! One signed-in user's view of the engine: the conversation list, the
//! selected conversation, and the operations the UI calls.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use murmur_shared::types::{ConversationId, SortDirection, UserProfile};
use murmur_store::{DocumentStore, MessageDoc};

use crate::config::ClientConfig;
use crate::directory::{Conversation, ConversationDirectory};
use crate::error::{ClientError, Result};
use crate::key_cache::KeyCache;
use crate::read_state::{clear_local_unread, ReadStateTracker};
use crate::stream::{MessageStream, StreamConfig, TimelineFeed};

#[derive(Default)]
struct SessionView {
    conversations: Vec<Conversation>,
    current: Option<Conversation>,
    /// Bumped by every `select` and `close`.
    selection: u64,
}

pub struct ChatSession<S> {
    me: UserProfile,
    keys: Arc<KeyCache>,
    directory: ConversationDirectory<S>,
    read_state: ReadStateTracker<S>,
    messages: MessageStream<S>,
    view: Arc<Mutex<SessionView>>,
}

impl<S: DocumentStore> ChatSession<S> {
    pub fn new(store: Arc<S>, me: UserProfile, config: &ClientConfig) -> Self {
        Self::with_key_cache(store, me, config, Arc::new(KeyCache::new()))
    }

    /// Build a session around an existing key cache.
    pub fn with_key_cache(store: Arc<S>, me: UserProfile, config: &ClientConfig, keys: Arc<KeyCache>) -> Self {
        let directory = ConversationDirectory::new(Arc::clone(&store), Arc::clone(&keys), me.clone());
        let read_state = ReadStateTracker::new(Arc::clone(&store), me.id.clone());
        let messages = MessageStream::new(store, Arc::clone(&keys), me.id.clone(), StreamConfig::from(config));

        Self {
            me,
            keys,
            directory,
            read_state,
            messages,
            view: Arc::new(Mutex::new(SessionView::default())),
        }
    }

    fn view(&self) -> MutexGuard<'_, SessionView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn me(&self) -> &UserProfile {
        &self.me
    }

    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.keys
    }

    pub fn directory(&self) -> &ConversationDirectory<S> {
        &self.directory
    }

    pub fn messages(&self) -> &MessageStream<S> {
        &self.messages
    }

    /// Last conversation list seen through [`live_conversations`](Self::live_conversations).
    pub fn conversations(&self) -> Vec<Conversation> {
        self.view().conversations.clone()
    }

    pub fn current_conversation(&self) -> Option<Conversation> {
        self.view().current.clone()
    }

    /// Live conversation list.  Each snapshot also refreshes the session's
    /// local view.
    pub fn live_conversations(&self) -> impl Stream<Item = Result<Vec<Conversation>>> + Send + Unpin + 'static {
        let view = Arc::clone(&self.view);
        self.directory.live_conversations().inspect(move |snapshot| {
            if let Ok(conversations) = snapshot {
                let mut view = view.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(current) = view.current.as_ref() {
                    if let Some(fresh) = conversations.iter().find(|c| c.id == current.id) {
                        view.current = Some(fresh.clone());
                    }
                }
                view.conversations = conversations.clone();
            }
        })
    }

    /// Resolve or create the conversation with `other` and select it.
    pub async fn start_conversation_with(&self, other: &UserProfile) -> Result<TimelineFeed> {
        let conversation = self.directory.resolve_or_create(other).await?;
        info!(conversation = %conversation.id, peer = %other.id, "Starting conversation");
        self.select(&conversation).await
    }

    /// Make `conversation` current: mark it read, make sure its key is
    /// cached, and follow its messages.
    ///
    /// Failing to reset the unread counter or to import the key does not
    /// block selection: the conversation opens, the failure is logged, and
    /// undecryptable messages show as placeholders.  If another `select` or
    /// `close` runs before this one finishes, this one returns
    /// [`ClientError::SelectionSuperseded`] and leaves the newer selection
    /// alone.
    pub async fn select(&self, conversation: &Conversation) -> Result<TimelineFeed> {
        let ticket = {
            let mut view = self.view();
            view.selection += 1;
            view.current = Some(conversation.clone());
            view.selection
        };

        if let Err(e) = self.mark_read(&conversation.id).await {
            warn!(conversation = %conversation.id, error = %e, "Failed to mark conversation read");
        }
        if let Err(e) = self.directory.ensure_key(conversation) {
            warn!(conversation = %conversation.id, error = %e, "Conversation key unavailable; messages stay encrypted");
        }

        // Subscribe under the view lock so the view and the stream agree.
        let view = self.view();
        if view.selection != ticket {
            debug!(conversation = %conversation.id, "Selection superseded");
            return Err(ClientError::SelectionSuperseded(conversation.id.clone()));
        }
        Ok(self.messages.subscribe(&conversation.id))
    }

    /// Send `text` to the current conversation.
    pub async fn send(&self, text: &str) -> Result<MessageDoc> {
        let current = self
            .current_conversation()
            .ok_or(ClientError::NoConversationSelected)?;
        self.messages.send(&current, text).await
    }

    /// Reset the viewer's unread count, locally at once and then in the store.
    pub async fn mark_read(&self, conversation_id: &ConversationId) -> Result<()> {
        {
            let mut view = self.view();
            clear_local_unread(&mut view.conversations, conversation_id);
            if let Some(current) = view.current.as_mut().filter(|c| c.id == *conversation_id) {
                current.unread_count = 0;
            }
        }
        self.read_state.mark_read(conversation_id).await
    }

    pub fn sort_direction(&self) -> SortDirection {
        self.messages.sort_direction()
    }

    pub fn toggle_sort(&self) -> SortDirection {
        self.messages.toggle_sort()
    }

    /// Deselect the current conversation and stop its message feed.
    pub fn close(&self) {
        let mut view = self.view();
        view.selection += 1;
        view.current = None;
        self.messages.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use std::collections::BTreeMap;

    use murmur_shared::types::UserId;
    use murmur_store::{
        ConversationDoc, ConversationPatch, NewConversation, NewMessage, SqliteStore, StoreOptions,
        Subscription,
    };
    use tokio::time::timeout;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    /// Delays conversation updates for one conversation.
    struct SlowStore {
        inner: SqliteStore,
        slow: ConversationId,
    }

    impl DocumentStore for SlowStore {
        async fn find_conversations(&self, member: &UserId) -> murmur_store::Result<Vec<ConversationDoc>> {
            self.inner.find_conversations(member).await
        }

        async fn create_conversation(&self, new: NewConversation) -> murmur_store::Result<ConversationDoc> {
            self.inner.create_conversation(new).await
        }

        async fn update_conversation(&self, id: &ConversationId, patch: ConversationPatch) -> murmur_store::Result<()> {
            if *id == self.slow {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            self.inner.update_conversation(id, patch).await
        }

        async fn create_message(&self, new: NewMessage) -> murmur_store::Result<MessageDoc> {
            self.inner.create_message(new).await
        }

        fn subscribe_conversations(&self, member: &UserId) -> Subscription<ConversationDoc> {
            self.inner.subscribe_conversations(member)
        }

        fn subscribe_messages(&self, id: &ConversationId, direction: SortDirection) -> Subscription<MessageDoc> {
            self.inner.subscribe_messages(id, direction)
        }
    }

    fn session(store: &Arc<SqliteStore>, me: UserProfile) -> ChatSession<SqliteStore> {
        ChatSession::new(Arc::clone(store), me, &ClientConfig::default())
    }

    #[tokio::test]
    async fn send_requires_a_selected_conversation() {
        let store = Arc::new(SqliteStore::open_in_memory(StoreOptions::default()).unwrap());
        let alice = session(&store, UserProfile::new("alice"));
        let err = alice.send("hi").await.unwrap_err();
        assert!(matches!(err, ClientError::NoConversationSelected));
    }

    #[tokio::test]
    async fn mark_read_zeroes_the_local_view() {
        let store = Arc::new(SqliteStore::open_in_memory(StoreOptions::default()).unwrap());
        let alice = session(&store, UserProfile::new("alice"));
        let bob = session(&store, UserProfile::new("bob"));

        let mut feed = alice.start_conversation_with(bob.me()).await.unwrap();
        timeout(WAIT, feed.next()).await.unwrap().unwrap().unwrap();
        for text in ["one", "two"] {
            alice.send(text).await.unwrap();
        }

        let mut live = bob.live_conversations();
        let list = timeout(WAIT, live.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(list[0].unread_count, 2);
        assert_eq!(bob.conversations()[0].unread_count, 2);

        let id = list[0].id.clone();
        bob.mark_read(&id).await.unwrap();
        assert_eq!(bob.conversations()[0].unread_count, 0);

        let stored = store.find_conversations(&bob.me().id).await.unwrap();
        assert_eq!(stored[0].unread_for(&bob.me().id), 0);
    }

    #[tokio::test]
    async fn close_clears_the_selection() {
        let store = Arc::new(SqliteStore::open_in_memory(StoreOptions::default()).unwrap());
        let alice = session(&store, UserProfile::new("alice"));

        let mut feed = alice.start_conversation_with(&UserProfile::new("bob")).await.unwrap();
        timeout(WAIT, feed.next()).await.unwrap().unwrap().unwrap();
        assert!(alice.current_conversation().is_some());

        alice.close();
        assert!(alice.current_conversation().is_none());
        assert!(timeout(WAIT, feed.next()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overlapping_selects_keep_view_and_stream_in_step() {
        let inner = SqliteStore::open_in_memory(StoreOptions::default()).unwrap();
        let alice = UserProfile::new("alice");
        let ab = inner
            .create_conversation(NewConversation::between(&alice, &UserProfile::new("bob"), "k".into()))
            .await
            .unwrap();
        let ac = inner
            .create_conversation(NewConversation::between(&alice, &UserProfile::new("carol"), "k".into()))
            .await
            .unwrap();
        let store = Arc::new(SlowStore {
            inner,
            slow: ab.id.clone(),
        });
        let session = ChatSession::new(store, alice.clone(), &ClientConfig::default());
        let keys = KeyCache::new();
        let ab = Conversation::from_doc(ab, &alice.id, &keys);
        let ac = Conversation::from_doc(ac, &alice.id, &keys);

        let (older, newer) = tokio::join!(session.select(&ab), session.select(&ac));

        assert!(matches!(older, Err(ClientError::SelectionSuperseded(id)) if id == ab.id));
        let feed = newer.unwrap();
        assert_eq!(feed.conversation_id(), &ac.id);
        assert_eq!(session.current_conversation().map(|c| c.id), Some(ac.id.clone()));
        assert_eq!(session.messages().active_conversation(), Some(ac.id.clone()));
    }

    #[tokio::test]
    async fn close_supersedes_an_unfinished_select() {
        let inner = SqliteStore::open_in_memory(StoreOptions::default()).unwrap();
        let alice = UserProfile::new("alice");
        let ab = inner
            .create_conversation(NewConversation::between(&alice, &UserProfile::new("bob"), "k".into()))
            .await
            .unwrap();
        let store = Arc::new(SlowStore {
            inner,
            slow: ab.id.clone(),
        });
        let session = ChatSession::new(store, alice.clone(), &ClientConfig::default());
        let ab = Conversation::from_doc(ab, &alice.id, &KeyCache::new());

        let closing = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            session.close();
        };
        let (selected, ()) = tokio::join!(session.select(&ab), closing);

        assert!(matches!(selected, Err(ClientError::SelectionSuperseded(_))));
        assert!(session.current_conversation().is_none());
        assert_eq!(session.messages().active_conversation(), None);
    }

    #[tokio::test]
    async fn select_opens_even_when_read_reset_and_key_fail() {
        let store = Arc::new(SqliteStore::open_in_memory(StoreOptions::default()).unwrap());
        let alice = session(&store, UserProfile::new("alice"));
        // Not in the store and without a key.
        let orphan = Conversation {
            id: ConversationId::from("orphan"),
            participants: vec![UserId::from("alice"), UserId::from("bob")],
            profiles: BTreeMap::new(),
            encryption_key: None,
            last_message: None,
            last_message_at: None,
            unread_count: 4,
        };

        let mut feed = alice.select(&orphan).await.unwrap();
        assert!(timeout(WAIT, feed.next()).await.unwrap().unwrap().unwrap().is_empty());
        assert_eq!(alice.current_conversation().unwrap().unread_count, 0);

        let err = alice.send("hello").await.unwrap_err();
        assert!(matches!(err, ClientError::NoKey(_)));
    }
}
