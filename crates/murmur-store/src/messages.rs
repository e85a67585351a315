use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use murmur_shared::types::{ConversationId, MessageId, SortDirection, UserId};

use crate::database::{micros_to_datetime, Database};
use crate::error::{Result, StoreError};
use crate::migrations::v001_initial::MESSAGE_ORDER_INDEX;
use crate::models::{MessageDoc, NewMessage};

impl Database {
    pub fn insert_message(&self, new: &NewMessage) -> Result<MessageDoc> {
        new.validate()?;

        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
            params![new.conversation_id.as_str()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::NotFound);
        }

        let id = MessageId::new(Uuid::new_v4().to_string());
        let timestamp = self.resolve_timestamp(new.timestamp);

        self.conn().execute(
            "INSERT INTO messages (id, conversation_id, sender_id, text, nonce, encrypted, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.as_str(),
                new.conversation_id.as_str(),
                new.sender_id.as_str(),
                new.text,
                new.nonce,
                new.encrypted,
                timestamp.timestamp_micros(),
            ],
        )?;

        Ok(MessageDoc {
            id,
            conversation_id: new.conversation_id.clone(),
            sender_id: new.sender_id.clone(),
            text: new.text.clone(),
            nonce: new.nonce.clone(),
            encrypted: new.encrypted,
            timestamp: Some(timestamp),
        })
    }

    /// Every message of a conversation ordered by server timestamp.
    ///
    /// The query is pinned to the `(conversation_id, timestamp)` index; when
    /// that index is missing SQLite refuses to prepare it and the error
    /// surfaces as [`StoreError::MissingIndex`].
    pub fn list_messages_for_conversation(
        &self,
        conversation_id: &ConversationId,
        direction: SortDirection,
    ) -> Result<Vec<MessageDoc>> {
        let order = direction.as_sql();
        let sql = format!(
            "SELECT id, conversation_id, sender_id, text, nonce, encrypted, timestamp
             FROM messages INDEXED BY {MESSAGE_ORDER_INDEX}
             WHERE conversation_id = ?1
             ORDER BY timestamp {order}, rowid {order}"
        );
        let mut stmt = self.conn().prepare(&sql)?;

        let rows = stmt.query_map(params![conversation_id.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message(&self, id: &MessageId) -> Result<MessageDoc> {
        self.conn()
            .query_row(
                "SELECT id, conversation_id, sender_id, text, nonce, encrypted, timestamp
                 FROM messages WHERE id = ?1",
                params![id.as_str()],
                row_to_message,
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageDoc> {
    let timestamp: Option<i64> = row.get(6)?;

    Ok(MessageDoc {
        id: MessageId(row.get(0)?),
        conversation_id: ConversationId(row.get(1)?),
        sender_id: UserId(row.get(2)?),
        text: row.get(3)?,
        nonce: row.get(4)?,
        encrypted: row.get(5)?,
        timestamp: timestamp.and_then(micros_to_datetime),
    })
}
