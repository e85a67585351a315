//! End-to-end: two users sharing one store.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use murmur_client::{ChatSession, ClientConfig, ClientError, LastMessage, Timeline, TimelineFeed};
use murmur_shared::types::UserProfile;
use murmur_shared::SortDirection;
use murmur_store::{DocumentStore, SqliteStore, StoreOptions};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn shared_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory(StoreOptions::default()).unwrap())
}

fn alice() -> UserProfile {
    UserProfile::new("alice").with_display_name("Alice")
}

fn bob() -> UserProfile {
    UserProfile::new("bob").with_display_name("Bob")
}

async fn next_timeline(feed: &mut TimelineFeed) -> Timeline {
    timeout(WAIT, feed.next())
        .await
        .expect("timed out")
        .expect("feed ended")
        .expect("feed error")
}

async fn wait_for(feed: &mut TimelineFeed, pred: impl Fn(&Timeline) -> bool) -> Timeline {
    loop {
        let timeline = next_timeline(feed).await;
        if pred(&timeline) {
            return timeline;
        }
    }
}

#[tokio::test]
async fn first_message_between_two_users() {
    let store = shared_store();
    let config = ClientConfig::default();
    let a = ChatSession::new(Arc::clone(&store), alice(), &config);
    let b = ChatSession::new(Arc::clone(&store), bob(), &config);

    // No conversation yet: one is created with a fresh key.
    assert!(store.find_conversations(&alice().id).await.unwrap().is_empty());
    let mut a_feed = a.start_conversation_with(&bob()).await.unwrap();
    let conversation = a.current_conversation().unwrap();
    assert_eq!(conversation.participants, vec![alice().id, bob().id]);
    assert!(conversation.encryption_key.is_some());
    assert!(a.key_cache().contains(&conversation.id));
    assert!(next_timeline(&mut a_feed).await.is_empty());

    // The sender sees the plaintext before the store round trip completes.
    a.send("hello").await.unwrap();
    let optimistic = next_timeline(&mut a_feed).await;
    let entry = optimistic.entries().next().unwrap();
    assert_eq!(entry.text(), "hello");
    assert!(entry.is_decrypted());
    assert!(entry.is_pending());

    // Then the persisted copy replaces it.
    let settled = wait_for(&mut a_feed, |t| t.pending_count() == 0).await;
    assert_eq!(settled.len(), 1);
    let entry = settled.entries().next().unwrap();
    assert_eq!(entry.text(), "hello");
    assert!(entry.timestamp().is_some());

    // Stored as ciphertext with a nonce; preview and counters updated.
    let stored = store
        .with_db(|db| db.list_messages_for_conversation(&conversation.id, SortDirection::Ascending))
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].encrypted);
    assert!(stored[0].nonce.is_some());
    assert_ne!(stored[0].text, "hello");

    let doc = store.find_conversations(&bob().id).await.unwrap().remove(0);
    assert!(doc.last_message_encrypted);
    assert!(doc.last_message_nonce.is_some());
    assert!(doc.last_message_at >= stored[0].timestamp);
    assert_eq!(doc.unread_for(&bob().id), 1);
    assert_eq!(doc.unread_for(&alice().id), 0);

    // The peer sees the decrypted preview and an unread badge.
    let mut b_list = b.live_conversations();
    let list = timeout(WAIT, b_list.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].last_message, Some(LastMessage::Decrypted("hello".into())));
    assert_eq!(list[0].unread_count, 1);
    assert_eq!(list[0].title(&bob().id), "Alice");

    // Opening it clears the badge and shows the message.
    let mut b_feed = b.select(&list[0]).await.unwrap();
    assert_eq!(b.conversations()[0].unread_count, 0);
    let seen = next_timeline(&mut b_feed).await;
    assert_eq!(seen.entries().map(|e| e.text()).collect::<Vec<_>>(), vec!["hello"]);
    let doc = store.find_conversations(&bob().id).await.unwrap().remove(0);
    assert_eq!(doc.unread_for(&bob().id), 0);
}

#[tokio::test]
async fn resolving_again_reuses_the_conversation() {
    let store = shared_store();
    let config = ClientConfig::default();
    let a = ChatSession::new(Arc::clone(&store), alice(), &config);
    let b = ChatSession::new(Arc::clone(&store), bob(), &config);

    let first = a.directory().resolve_or_create(&bob()).await.unwrap();
    let again = a.directory().resolve_or_create(&bob()).await.unwrap();
    let from_peer = b.directory().resolve_or_create(&alice()).await.unwrap();

    assert_eq!(first.id, again.id);
    assert_eq!(first.id, from_peer.id);
    assert_eq!(store.find_conversations(&alice().id).await.unwrap().len(), 1);
    assert!(b.key_cache().contains(&first.id));
}

#[tokio::test]
async fn replies_flow_both_ways() {
    let store = shared_store();
    let config = ClientConfig::default();
    let a = ChatSession::new(Arc::clone(&store), alice(), &config);
    let b = ChatSession::new(Arc::clone(&store), bob(), &config);

    let mut a_feed = a.start_conversation_with(&bob()).await.unwrap();
    let mut b_feed = b.start_conversation_with(&alice()).await.unwrap();
    next_timeline(&mut a_feed).await;
    next_timeline(&mut b_feed).await;

    a.send("ping").await.unwrap();
    b.send("pong").await.unwrap();

    let settled = wait_for(&mut a_feed, |t| t.len() == 2 && t.pending_count() == 0).await;
    let texts: Vec<_> = settled.entries().map(|e| e.text()).collect();
    assert_eq!(texts, vec!["ping", "pong"]);
    let senders: Vec<_> = settled.entries().map(|e| e.sender().as_str()).collect();
    assert_eq!(senders, vec!["alice", "bob"]);
}

#[tokio::test]
async fn sending_before_the_key_is_known_fails() {
    let store = shared_store();
    let config = ClientConfig::default();
    let a = ChatSession::new(Arc::clone(&store), alice(), &config);

    let mut conversation = a.directory().resolve_or_create(&bob()).await.unwrap();
    conversation.id = "unknown".into();
    conversation.encryption_key = None;

    let err = a.messages().send(&conversation, "secret").await.unwrap_err();
    assert!(matches!(err, ClientError::NoKey(_)));
}

#[tokio::test]
async fn history_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("murmur.db");
    let config = ClientConfig::default();

    {
        let store = Arc::new(SqliteStore::open(&path, StoreOptions::default()).unwrap());
        let a = ChatSession::new(store, alice(), &config);
        let mut feed = a.start_conversation_with(&bob()).await.unwrap();
        next_timeline(&mut feed).await;
        a.send("still here").await.unwrap();
        wait_for(&mut feed, |t| t.len() == 1 && t.pending_count() == 0).await;
        a.close();
    }

    // A new process starts with an empty key cache; the stored key is reused.
    let store = Arc::new(SqliteStore::open(&path, StoreOptions::default()).unwrap());
    let a = ChatSession::new(store, alice(), &config);
    assert!(a.key_cache().is_empty());

    let mut feed = a.start_conversation_with(&bob()).await.unwrap();
    let timeline = next_timeline(&mut feed).await;
    let entry = timeline.entries().next().unwrap();
    assert_eq!(entry.text(), "still here");
    assert!(entry.is_decrypted());
}
