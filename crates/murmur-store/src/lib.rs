//! # murmur-store
//!
//! The document-and-subscription store that conversations and messages live
//! in.  The engine only talks to it through the [`DocumentStore`] trait:
//! one-shot queries, creates, merge-updates, and live snapshot
//! subscriptions.  [`SqliteStore`] is the bundled implementation, a
//! `rusqlite` database plus a change feed that re-runs subscribed queries
//! whenever a collection is written.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod sqlite_store;
pub mod store;
pub mod subscription;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use sqlite_store::{SqliteStore, StoreOptions};
pub use store::DocumentStore;
pub use subscription::{Collection, Subscription};
