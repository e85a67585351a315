use std::future::Future;

use murmur_shared::types::{ConversationId, SortDirection, UserId};

use crate::error::Result;
use crate::models::{ConversationDoc, ConversationPatch, MessageDoc, NewConversation, NewMessage};
use crate::subscription::Subscription;

/// The contract the messaging engine relies on from its backing store.
///
/// Writes resolve [`TimestampValue::ServerTimestamp`](crate::TimestampValue)
/// and [`Counter::Increment`](crate::Counter) store-side.  Subscriptions
/// deliver full result sets, never diffs, and must be created from within a
/// tokio runtime.
pub trait DocumentStore: Send + Sync + 'static {
    /// One-shot query: every conversation whose participants include `member`.
    fn find_conversations(
        &self,
        member: &UserId,
    ) -> impl Future<Output = Result<Vec<ConversationDoc>>> + Send;

    fn create_conversation(
        &self,
        new: NewConversation,
    ) -> impl Future<Output = Result<ConversationDoc>> + Send;

    /// Merge-update: only the fields set in `patch` are written.
    fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> impl Future<Output = Result<()>> + Send;

    fn create_message(&self, new: NewMessage) -> impl Future<Output = Result<MessageDoc>> + Send;

    /// Live view of every conversation whose participants include `member`.
    fn subscribe_conversations(&self, member: &UserId) -> Subscription<ConversationDoc>;

    /// Live view of a conversation's messages ordered by server timestamp.
    fn subscribe_messages(
        &self,
        conversation_id: &ConversationId,
        direction: SortDirection,
    ) -> Subscription<MessageDoc>;
}
