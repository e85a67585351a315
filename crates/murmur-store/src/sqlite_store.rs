//! [`DocumentStore`] backed by a local SQLite database.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

use murmur_shared::types::{ConversationId, SortDirection, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{ConversationDoc, ConversationPatch, MessageDoc, NewConversation, NewMessage};
use crate::store::DocumentStore;
use crate::subscription::{spawn_snapshots, Collection, SnapshotSource, Subscription};

const CHANGE_FEED_CAPACITY: usize = 64;

/// Tuning knobs for subscriptions.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How often subscriptions re-query even without a local write.
    pub poll_interval: Duration,
    /// Snapshots buffered per subscription before the task waits.
    pub snapshot_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            snapshot_capacity: 16,
        }
    }
}

pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
    changes: broadcast::Sender<Collection>,
    options: StoreOptions,
}

impl SqliteStore {
    pub fn new(database: Database, options: StoreOptions) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            db: Arc::new(Mutex::new(database)),
            changes,
            options,
        }
    }

    /// Open the database in the platform data directory.
    pub fn open_default(options: StoreOptions) -> Result<Self> {
        Ok(Self::new(Database::new()?, options))
    }

    pub fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?, options))
    }

    pub fn open_in_memory(options: StoreOptions) -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?, options))
    }

    /// Run `f` against the locked database.
    pub fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let guard = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        f(&guard)
    }

    fn notify(&self, collection: Collection) {
        // No live subscribers is not an error.
        let _ = self.changes.send(collection);
    }

    fn snapshot_source(&self, watched: Collection) -> SnapshotSource {
        SnapshotSource {
            db: Arc::clone(&self.db),
            changes: self.changes.subscribe(),
            watched,
            poll_interval: self.options.poll_interval,
            capacity: self.options.snapshot_capacity,
        }
    }
}

impl DocumentStore for SqliteStore {
    async fn find_conversations(&self, member: &UserId) -> Result<Vec<ConversationDoc>> {
        self.with_db(|db| db.list_conversations_for_member(member))
    }

    async fn create_conversation(&self, new: NewConversation) -> Result<ConversationDoc> {
        let doc = self.with_db(|db| db.insert_conversation(&new))?;
        debug!(conversation = %doc.id, "Conversation document created");
        self.notify(Collection::Conversations);
        Ok(doc)
    }

    async fn update_conversation(&self, id: &ConversationId, patch: ConversationPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        self.with_db(|db| db.apply_conversation_patch(id, &patch))?;
        self.notify(Collection::Conversations);
        Ok(())
    }

    async fn create_message(&self, new: NewMessage) -> Result<MessageDoc> {
        let doc = self.with_db(|db| db.insert_message(&new))?;
        debug!(message = %doc.id, conversation = %doc.conversation_id, "Message document created");
        self.notify(Collection::Messages);
        Ok(doc)
    }

    fn subscribe_conversations(&self, member: &UserId) -> Subscription<ConversationDoc> {
        let member = member.clone();
        spawn_snapshots(self.snapshot_source(Collection::Conversations), move |db| {
            db.list_conversations_for_member(&member)
        })
    }

    fn subscribe_messages(
        &self,
        conversation_id: &ConversationId,
        direction: SortDirection,
    ) -> Subscription<MessageDoc> {
        let conversation_id = conversation_id.clone();
        spawn_snapshots(self.snapshot_source(Collection::Messages), move |db| {
            db.list_messages_for_conversation(&conversation_id, direction)
        })
    }
}
