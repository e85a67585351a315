use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS unread_counters (
    conversation_id TEXT NOT NULL,            -- FK -> conversations(id)
    user_id         TEXT NOT NULL,            -- the viewer this counter belongs to
    count           INTEGER NOT NULL DEFAULT 0,

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
