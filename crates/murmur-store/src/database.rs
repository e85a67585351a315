//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.  It also owns the store's
//! clock: every `ServerTimestamp` written through this handle resolves to a
//! value strictly greater than the previous one.

use std::cell::Cell;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;
use crate::models::TimestampValue;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
    /// Last timestamp handed out, in microseconds since the epoch.
    clock: Cell<i64>,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/murmur/murmur.db`
    /// - macOS:   `~/Library/Application Support/com.murmur.murmur/murmur.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\murmur\murmur\data\murmur.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "murmur", "murmur").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("murmur.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open a private in-memory database.  Used by tests and throwaway sessions.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        let last: Option<i64> = conn.query_row(
            "SELECT MAX(v) FROM (
                 SELECT MAX(timestamp) AS v FROM messages
                 UNION ALL
                 SELECT MAX(last_message_at) FROM conversations
                 UNION ALL
                 SELECT MAX(created_at) FROM conversations
             )",
            [],
            |row| row.get(0),
        )?;

        Ok(Self {
            conn,
            clock: Cell::new(last.unwrap_or(0)),
        })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    /// Next store-assigned timestamp, strictly after every earlier one.
    pub fn server_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_micros();
        let next = now.max(self.clock.get() + 1);
        self.clock.set(next);
        micros_to_datetime(next).unwrap_or_else(Utc::now)
    }

    pub(crate) fn resolve_timestamp(&self, value: TimestampValue) -> DateTime<Utc> {
        match value {
            TimestampValue::ServerTimestamp => self.server_timestamp(),
            TimestampValue::At(at) => at,
        }
    }
}

pub(crate) fn micros_to_datetime(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
}
