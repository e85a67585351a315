//! # murmur-client
//!
//! The conversation key and message synchronization engine.
//!
//! - [`KeyCache`]: per-conversation keys, shared by every component.
//! - [`ConversationDirectory`]: find-or-create a conversation with a peer and
//!   follow the viewer's conversation list.
//! - [`MessageStream`]: decrypt, deduplicate, and order a conversation's
//!   messages, with optimistic sends.
//! - [`ReadStateTracker`]: unread counters.
//! - [`ChatSession`]: all of the above for one signed-in user.

pub mod config;
pub mod directory;
pub mod error;
pub mod key_cache;
pub mod read_state;
pub mod session;
pub mod stream;
pub mod timeline;

pub use config::ClientConfig;
pub use directory::{sort_conversations, Conversation, ConversationDirectory, LastMessage};
pub use error::{ClientError, Result};
pub use key_cache::KeyCache;
pub use read_state::ReadStateTracker;
pub use session::ChatSession;
pub use stream::{MessageStream, StreamConfig, TimelineFeed};
pub use timeline::{DayBucket, DayLabel, Timeline, TimelineEntry};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `tracing` subscriber.  `RUST_LOG` overrides the
/// default filter.  Calling it again is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("murmur_client=debug,murmur_store=info,warn"));

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
