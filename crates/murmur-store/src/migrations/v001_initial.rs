//! v001 -- Initial schema creation.
//!
//! Creates `conversations`, `conversation_participants`, and `messages`.
//! Timestamps are stored as integer microseconds since the Unix epoch so
//! that ordering is numeric.

use rusqlite::Connection;

/// Name of the composite index that ordered message queries are pinned to.
pub const MESSAGE_ORDER_INDEX: &str = "idx_messages_conversation_ts";

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id                     TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    participant_profiles   TEXT NOT NULL,              -- JSON map user id -> profile
    encryption_key         TEXT,                       -- exported symmetric key
    last_message           TEXT,                       -- ciphertext or plaintext preview
    last_message_nonce     TEXT,
    last_message_encrypted INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    last_message_at        INTEGER,                    -- microseconds
    created_at             INTEGER NOT NULL
);

-- ----------------------------------------------------------------
-- Participants (membership filter)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversation_participants (
    conversation_id TEXT NOT NULL,                     -- FK -> conversations(id)
    user_id         TEXT NOT NULL,
    position        INTEGER NOT NULL,

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_user
    ON conversation_participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,         -- UUID v4
    conversation_id TEXT NOT NULL,                     -- FK -> conversations(id)
    sender_id       TEXT NOT NULL,
    text            TEXT NOT NULL,                     -- ciphertext when encrypted
    nonce           TEXT,
    encrypted       INTEGER NOT NULL DEFAULT 0,        -- boolean 0/1
    timestamp       INTEGER,                           -- microseconds, server-assigned

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, timestamp);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
