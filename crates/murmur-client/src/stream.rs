//! Live, decrypted, deduplicated view of the selected conversation.
//!
//! One [`MessageStream`] serves one viewer.  Subscribing to a conversation
//! replaces the previous subscription: the old driver task is aborted and a
//! generation counter makes sure a batch it already pulled can never land in
//! the new conversation's state.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use chrono::{Local, Utc};
use futures::task::AtomicWaker;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use murmur_shared::crypto::encrypt_message;
use murmur_shared::types::{ConversationId, SortDirection, UserId};
use murmur_store::{
    ConversationPatch, DocumentStore, MessageDoc, NewMessage, Subscription, TimestampValue,
};

use crate::config::ClientConfig;
use crate::directory::Conversation;
use crate::error::{ClientError, Result};
use crate::key_cache::KeyCache;
use crate::read_state::unread_increments;
use crate::timeline::{
    group_by_day, reconcile, ConfirmedMessage, LocalId, PendingMessage, Reconciled, Timeline,
};

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub direction: SortDirection,
    pub feed_capacity: usize,
    pub pending_match_window: chrono::Duration,
}

impl From<&ClientConfig> for StreamConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            direction: config.default_sort,
            feed_capacity: config.feed_capacity.max(1),
            pending_match_window: chrono::Duration::from_std(config.pending_match_window)
                .unwrap_or_else(|_| chrono::Duration::zero()),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// Render produced outside the driver while the feed was full.  Newest wins.
#[derive(Default)]
struct Overflow {
    latest: Mutex<Option<Timeline>>,
    waker: AtomicWaker,
}

impl Overflow {
    fn store(&self, timeline: Timeline) {
        {
            let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
            if latest.as_ref().map_or(true, |t| t.revision < timeline.revision) {
                *latest = Some(timeline);
            }
        }
        self.waker.wake();
    }

    fn take(&self) -> Option<Timeline> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Sending side of one [`TimelineFeed`].
#[derive(Clone)]
struct FeedHandle {
    tx: mpsc::Sender<Result<Timeline>>,
    overflow: Arc<Overflow>,
}

struct ActiveConversation {
    id: ConversationId,
    generation: u64,
    records: Vec<MessageDoc>,
    pending: Vec<PendingMessage>,
    feed: FeedHandle,
    driver: Option<JoinHandle<()>>,
}

impl Drop for ActiveConversation {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

struct StreamState {
    generation: u64,
    revision: u64,
    direction: SortDirection,
    next_local_id: u64,
    active: Option<ActiveConversation>,
}

impl StreamState {
    /// The active conversation, if it is still `generation`.
    fn current(&mut self, generation: u64) -> Option<&mut ActiveConversation> {
        self.active.as_mut().filter(|a| a.generation == generation)
    }

    fn render(&mut self, keys: &KeyCache, window: chrono::Duration) -> Option<(Timeline, FeedHandle)> {
        self.revision += 1;
        let revision = self.revision;
        let direction = self.direction;
        let active = self.active.as_mut()?;

        let key = keys.get(&active.id);
        let confirmed = active
            .records
            .iter()
            .cloned()
            .map(|doc| ConfirmedMessage::from_doc(doc, key.as_deref()))
            .collect();
        let Reconciled { entries, superseded } = reconcile(confirmed, &active.pending, window);
        active.pending.retain(|p| !superseded.contains(&p.local_id));

        let days = group_by_day(entries, direction, &Local, Local::now().date_naive());
        let timeline = Timeline {
            conversation_id: active.id.clone(),
            direction,
            revision,
            days,
        };
        Some((timeline, active.feed.clone()))
    }
}

pub struct MessageStream<S> {
    store: Arc<S>,
    keys: Arc<KeyCache>,
    me: UserId,
    config: StreamConfig,
    state: Arc<Mutex<StreamState>>,
}

impl<S: DocumentStore> MessageStream<S> {
    pub fn new(store: Arc<S>, keys: Arc<KeyCache>, me: UserId, config: StreamConfig) -> Self {
        let state = StreamState {
            generation: 0,
            revision: 0,
            direction: config.direction,
            next_local_id: 0,
            active: None,
        };
        Self {
            store,
            keys,
            me,
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        lock_state(&self.state)
    }

    pub fn sort_direction(&self) -> SortDirection {
        self.lock().direction
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.lock().active.as_ref().map(|a| a.id.clone())
    }

    /// Optimistic entries not yet matched by a persisted copy.
    pub fn pending_count(&self) -> usize {
        self.lock().active.as_ref().map_or(0, |a| a.pending.len())
    }

    /// Start following `conversation_id`, replacing any current
    /// subscription.  The returned feed yields a fresh [`Timeline`] for every
    /// store snapshot, send, or sort change, and ends when the stream moves to
    /// another conversation.
    pub fn subscribe(&self, conversation_id: &ConversationId) -> TimelineFeed {
        let (tx, rx) = mpsc::channel(self.config.feed_capacity);
        let overflow = Arc::new(Overflow::default());
        let snapshots = self
            .store
            .subscribe_messages(conversation_id, SortDirection::Ascending);

        let generation = {
            let mut state = self.lock();
            state.generation += 1;
            let generation = state.generation;

            // Re-selecting the same conversation keeps unsent entries visible.
            let pending = match state.active.take() {
                Some(mut previous) if previous.id == *conversation_id => std::mem::take(&mut previous.pending),
                _ => Vec::new(),
            };
            state.active = Some(ActiveConversation {
                id: conversation_id.clone(),
                generation,
                records: Vec::new(),
                pending,
                feed: FeedHandle {
                    tx: tx.clone(),
                    overflow: Arc::clone(&overflow),
                },
                driver: None,
            });
            generation
        };

        let driver = tokio::spawn(drive(
            snapshots,
            Arc::clone(&self.state),
            Arc::clone(&self.keys),
            generation,
            tx,
            self.config.pending_match_window,
        ));

        match self.lock().current(generation) {
            Some(active) => active.driver = Some(driver),
            None => driver.abort(),
        }

        info!(conversation = %conversation_id, generation, "Subscribed to messages");
        TimelineFeed {
            conversation_id: conversation_id.clone(),
            rx,
            overflow,
            last_revision: None,
        }
    }

    /// Stop following the current conversation.  Its feed ends.
    pub fn unsubscribe(&self) {
        let previous = {
            let mut state = self.lock();
            state.generation += 1;
            state.active.take()
        };
        if let Some(previous) = previous {
            debug!(conversation = %previous.id, "Unsubscribed from messages");
        }
    }

    /// Change the sort direction of the whole stream and re-render.
    pub fn set_sort_direction(&self, direction: SortDirection) {
        let rendered = {
            let mut state = self.lock();
            if state.direction == direction {
                return;
            }
            state.direction = direction;
            state.render(&self.keys, self.config.pending_match_window)
        };
        if let Some((timeline, feed)) = rendered {
            offer(&feed, timeline);
        }
    }

    pub fn toggle_sort(&self) -> SortDirection {
        let direction = self.sort_direction().toggled();
        self.set_sort_direction(direction);
        direction
    }

    /// Encrypt and persist `plaintext`, showing it optimistically first.
    ///
    /// Fails with [`ClientError::NoKey`] when the conversation key is not
    /// cached; nothing is shown or stored in that case.  If persisting the
    /// message fails the optimistic entry is withdrawn.
    pub async fn send(&self, conversation: &Conversation, plaintext: &str) -> Result<MessageDoc> {
        if plaintext.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let key = self
            .keys
            .get(&conversation.id)
            .ok_or_else(|| ClientError::NoKey(conversation.id.clone()))?;
        let sealed = encrypt_message(plaintext, &key)?;

        let local_id = self.push_pending(&conversation.id, plaintext);

        let message = self
            .store
            .create_message(NewMessage {
                conversation_id: conversation.id.clone(),
                sender_id: self.me.clone(),
                text: sealed.ciphertext.clone(),
                nonce: Some(sealed.nonce.clone()),
                encrypted: true,
                timestamp: TimestampValue::ServerTimestamp,
            })
            .await;
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!(conversation = %conversation.id, error = %e, "Failed to send message");
                if let Some(local_id) = local_id {
                    self.withdraw_pending(&conversation.id, local_id);
                }
                return Err(e.into());
            }
        };

        let patch = ConversationPatch {
            last_message: Some(sealed.ciphertext),
            last_message_nonce: Some(sealed.nonce),
            last_message_encrypted: Some(true),
            last_message_at: Some(TimestampValue::ServerTimestamp),
            unread: unread_increments(&conversation.participants, &self.me),
        };
        if let Err(e) = self.store.update_conversation(&conversation.id, patch).await {
            warn!(conversation = %conversation.id, error = %e, "Message stored but conversation preview not updated");
            return Err(e.into());
        }

        debug!(conversation = %conversation.id, message = %message.id, "Message sent");
        Ok(message)
    }

    fn push_pending(&self, conversation_id: &ConversationId, text: &str) -> Option<LocalId> {
        let (local_id, rendered) = {
            let mut state = self.lock();
            state.next_local_id += 1;
            let local_id = LocalId::new(state.next_local_id);
            let me = self.me.clone();

            let active = state.active.as_mut().filter(|a| a.id == *conversation_id)?;
            active.pending.push(PendingMessage {
                local_id,
                sender: me,
                text: text.to_string(),
                created_at: Utc::now(),
            });
            (local_id, state.render(&self.keys, self.config.pending_match_window))
        };
        if let Some((timeline, feed)) = rendered {
            offer(&feed, timeline);
        }
        Some(local_id)
    }

    fn withdraw_pending(&self, conversation_id: &ConversationId, local_id: LocalId) {
        let rendered = {
            let mut state = self.lock();
            let Some(active) = state.active.as_mut().filter(|a| a.id == *conversation_id) else {
                return;
            };
            active.pending.retain(|p| p.local_id != local_id);
            state.render(&self.keys, self.config.pending_match_window)
        };
        if let Some((timeline, feed)) = rendered {
            offer(&feed, timeline);
        }
    }
}

impl<S> Drop for MessageStream<S> {
    fn drop(&mut self) {
        lock_state(&self.state).active = None;
    }
}

fn lock_state(state: &Mutex<StreamState>) -> MutexGuard<'_, StreamState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Deliver an out-of-band render without waiting.  When the feed is full the
/// render is parked in the overflow slot, which the feed reads once its
/// channel is drained.
fn offer(feed: &FeedHandle, timeline: Timeline) {
    match feed.tx.try_send(Ok(timeline)) {
        Ok(()) => {}
        Err(TrySendError::Full(Ok(timeline))) => feed.overflow.store(timeline),
        Err(TrySendError::Full(Err(_))) => {}
        Err(TrySendError::Closed(_)) => debug!("Timeline feed closed"),
    }
}

async fn drive(
    mut snapshots: Subscription<MessageDoc>,
    state: Arc<Mutex<StreamState>>,
    keys: Arc<KeyCache>,
    generation: u64,
    feed: mpsc::Sender<Result<Timeline>>,
    window: chrono::Duration,
) {
    while let Some(batch) = snapshots.next().await {
        let update = match batch {
            Ok(records) => {
                let rendered = {
                    let mut state = lock_state(&state);
                    match state.current(generation) {
                        Some(active) => {
                            active.records = records;
                            state.render(&keys, window)
                        }
                        None => None,
                    }
                };
                match rendered {
                    Some((timeline, _)) => Ok(timeline),
                    None => {
                        debug!(generation, "Dropping batch for a replaced subscription");
                        break;
                    }
                }
            }
            Err(e) if e.is_missing_index() => {
                error!(error = %e, "Message ordering index is missing; subscription stopped");
                let _ = feed.send(Err(e.into())).await;
                break;
            }
            Err(e) => {
                warn!(error = %e, "Message subscription error");
                Err(e.into())
            }
        };

        if feed.send(update).await.is_err() {
            break;
        }
    }
}

/// Stream of rendered timelines for one subscription.
pub struct TimelineFeed {
    conversation_id: ConversationId,
    rx: mpsc::Receiver<Result<Timeline>>,
    overflow: Arc<Overflow>,
    last_revision: Option<u64>,
}

impl TimelineFeed {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }
}

impl Stream for TimelineFeed {
    type Item = Result<Timeline>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let next = match self.rx.poll_recv(cx) {
                Poll::Ready(Some(item)) => item,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => {
                    self.overflow.waker.register(cx.waker());
                    match self.overflow.take() {
                        Some(timeline) => Ok(timeline),
                        None => return Poll::Pending,
                    }
                }
            };

            match next {
                // Renders can race each other into the channel; skip stale ones.
                Ok(timeline) if self.last_revision.is_some_and(|r| timeline.revision <= r) => continue,
                Ok(timeline) => {
                    self.last_revision = Some(timeline.revision);
                    return Poll::Ready(Some(Ok(timeline)));
                }
                Err(e) => return Poll::Ready(Some(Err(e))),
            }
        }
    }
}
