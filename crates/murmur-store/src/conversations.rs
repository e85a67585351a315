//! CRUD operations for [`ConversationDoc`] records.

use std::collections::BTreeMap;

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use murmur_shared::types::{ConversationId, UserId, UserProfile};

use crate::database::{micros_to_datetime, Database};
use crate::error::{Result, StoreError};
use crate::models::{ConversationDoc, ConversationPatch, Counter, NewConversation};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new conversation with both participants and zeroed unread
    /// counters.  The id is assigned here.
    pub fn insert_conversation(&self, new: &NewConversation) -> Result<ConversationDoc> {
        new.validate()?;

        let id = ConversationId::new(Uuid::new_v4().to_string());
        let created_at = self.server_timestamp();
        let profiles_json = serde_json::to_string(&new.participant_profiles)?;

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, participant_profiles, encryption_key, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id.as_str(),
                profiles_json,
                new.encryption_key,
                created_at.timestamp_micros(),
            ],
        )?;
        for (position, user) in new.participants.iter().enumerate() {
            tx.execute(
                "INSERT INTO conversation_participants (conversation_id, user_id, position)
                 VALUES (?1, ?2, ?3)",
                params![id.as_str(), user.as_str(), position as i64],
            )?;
            tx.execute(
                "INSERT INTO unread_counters (conversation_id, user_id, count)
                 VALUES (?1, ?2, 0)",
                params![id.as_str(), user.as_str()],
            )?;
        }
        tx.commit()?;

        self.get_conversation(&id)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single conversation by id.
    pub fn get_conversation(&self, id: &ConversationId) -> Result<ConversationDoc> {
        let mut doc = self
            .conn()
            .query_row(
                "SELECT id, participant_profiles, encryption_key, last_message,
                        last_message_nonce, last_message_encrypted, last_message_at, created_at
                 FROM conversations
                 WHERE id = ?1",
                params![id.as_str()],
                row_to_conversation,
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        doc.participants = self.load_participants(id)?;
        doc.unread_counts = self.load_unread_counts(id)?;
        Ok(doc)
    }

    /// All conversations `member` takes part in, oldest first.
    pub fn list_conversations_for_member(&self, member: &UserId) -> Result<Vec<ConversationDoc>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id
             FROM conversations c
             JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE p.user_id = ?1
             ORDER BY c.created_at ASC, c.rowid ASC",
        )?;

        let ids = stmt
            .query_map(params![member.as_str()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        ids.into_iter()
            .map(|id| self.get_conversation(&ConversationId(id)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Merge `patch` into the conversation; untouched fields keep their value.
    pub fn apply_conversation_patch(
        &self,
        id: &ConversationId,
        patch: &ConversationPatch,
    ) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::NotFound);
        }

        if let Some(ref text) = patch.last_message {
            tx.execute(
                "UPDATE conversations SET last_message = ?2 WHERE id = ?1",
                params![id.as_str(), text],
            )?;
        }
        if let Some(ref nonce) = patch.last_message_nonce {
            tx.execute(
                "UPDATE conversations SET last_message_nonce = ?2 WHERE id = ?1",
                params![id.as_str(), nonce],
            )?;
        }
        if let Some(encrypted) = patch.last_message_encrypted {
            tx.execute(
                "UPDATE conversations SET last_message_encrypted = ?2 WHERE id = ?1",
                params![id.as_str(), encrypted],
            )?;
        }
        if let Some(at) = patch.last_message_at {
            let at = self.resolve_timestamp(at);
            tx.execute(
                "UPDATE conversations SET last_message_at = ?2 WHERE id = ?1",
                params![id.as_str(), at.timestamp_micros()],
            )?;
        }
        for (user, counter) in &patch.unread {
            let sql = match counter {
                Counter::Set(_) => {
                    "INSERT INTO unread_counters (conversation_id, user_id, count)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT (conversation_id, user_id) DO UPDATE SET count = excluded.count"
                }
                Counter::Increment(_) => {
                    "INSERT INTO unread_counters (conversation_id, user_id, count)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT (conversation_id, user_id)
                     DO UPDATE SET count = unread_counters.count + excluded.count"
                }
            };
            let value = match counter {
                Counter::Set(v) | Counter::Increment(v) => *v,
            };
            tx.execute(sql, params![id.as_str(), user.as_str(), value])?;
        }

        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn load_participants(&self, id: &ConversationId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM conversation_participants
             WHERE conversation_id = ?1
             ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| row.get::<_, String>(0))?;

        let mut participants = Vec::new();
        for row in rows {
            participants.push(UserId(row?));
        }
        Ok(participants)
    }

    fn load_unread_counts(&self, id: &ConversationId) -> Result<BTreeMap<UserId, i64>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, count FROM unread_counters WHERE conversation_id = ?1",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok((UserId(row.get::<_, String>(0)?), row.get::<_, i64>(1)?))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (user, count) = row?;
            counts.insert(user, count);
        }
        Ok(counts)
    }
}

/// Map a `rusqlite::Row` to a [`ConversationDoc`] without participants or
/// counters; those live in their own tables.
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationDoc> {
    let id: String = row.get(0)?;
    let profiles_json: String = row.get(1)?;
    let last_message_at: Option<i64> = row.get(6)?;
    let created_at: i64 = row.get(7)?;

    let participant_profiles: BTreeMap<UserId, UserProfile> = serde_json::from_str(&profiles_json)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let created_at = micros_to_datetime(created_at).ok_or(rusqlite::Error::IntegralValueOutOfRange(
        7,
        created_at,
    ))?;

    Ok(ConversationDoc {
        id: ConversationId(id),
        participants: Vec::new(),
        participant_profiles,
        encryption_key: row.get(2)?,
        last_message: row.get(3)?,
        last_message_nonce: row.get(4)?,
        last_message_encrypted: row.get(5)?,
        last_message_at: last_message_at.and_then(micros_to_datetime),
        unread_counts: BTreeMap::new(),
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimestampValue;

    fn alice() -> UserProfile {
        UserProfile::new("alice").with_display_name("Alice")
    }

    fn bob() -> UserProfile {
        UserProfile::new("bob").with_email("bob@example.com")
    }

    #[test]
    fn insert_and_fetch_conversation() {
        let db = Database::open_in_memory().unwrap();
        let created = db
            .insert_conversation(&NewConversation::between(&alice(), &bob(), "a2V5".into()))
            .unwrap();

        assert_eq!(created.participants, vec![UserId::from("alice"), UserId::from("bob")]);
        assert_eq!(created.encryption_key.as_deref(), Some("a2V5"));
        assert_eq!(created.participant_profiles[&UserId::from("bob")], bob());
        assert_eq!(created.unread_for(&UserId::from("bob")), 0);
        assert!(created.last_message_at.is_none());

        let fetched = db.get_conversation(&created.id).unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn list_filters_by_membership() {
        let db = Database::open_in_memory().unwrap();
        let carol = UserProfile::new("carol");
        let ab = db
            .insert_conversation(&NewConversation::between(&alice(), &bob(), "k1".into()))
            .unwrap();
        let bc = db
            .insert_conversation(&NewConversation::between(&bob(), &carol, "k2".into()))
            .unwrap();

        let for_alice = db.list_conversations_for_member(&UserId::from("alice")).unwrap();
        assert_eq!(for_alice.len(), 1);
        assert_eq!(for_alice[0].id, ab.id);

        let for_bob: Vec<_> = db
            .list_conversations_for_member(&UserId::from("bob"))
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(for_bob, vec![ab.id, bc.id]);
    }

    #[test]
    fn patch_merges_only_given_fields() {
        let db = Database::open_in_memory().unwrap();
        let conv = db
            .insert_conversation(&NewConversation::between(&alice(), &bob(), "k".into()))
            .unwrap();

        db.apply_conversation_patch(
            &conv.id,
            &ConversationPatch {
                last_message: Some("cipher".into()),
                last_message_nonce: Some("nonce".into()),
                last_message_encrypted: Some(true),
                last_message_at: Some(TimestampValue::ServerTimestamp),
                unread: vec![(UserId::from("bob"), Counter::Increment(1))],
            },
        )
        .unwrap();
        db.apply_conversation_patch(
            &conv.id,
            &ConversationPatch {
                unread: vec![(UserId::from("bob"), Counter::Increment(2))],
                ..Default::default()
            },
        )
        .unwrap();

        let updated = db.get_conversation(&conv.id).unwrap();
        assert_eq!(updated.last_message.as_deref(), Some("cipher"));
        assert_eq!(updated.last_message_nonce.as_deref(), Some("nonce"));
        assert!(updated.last_message_encrypted);
        assert!(updated.last_message_at.is_some());
        assert_eq!(updated.encryption_key.as_deref(), Some("k"));
        assert_eq!(updated.unread_for(&UserId::from("bob")), 3);
        assert_eq!(updated.unread_for(&UserId::from("alice")), 0);

        db.apply_conversation_patch(
            &conv.id,
            &ConversationPatch {
                unread: vec![(UserId::from("bob"), Counter::Set(0))],
                ..Default::default()
            },
        )
        .unwrap();
        let read = db.get_conversation(&conv.id).unwrap();
        assert_eq!(read.unread_for(&UserId::from("bob")), 0);
        assert_eq!(read.last_message.as_deref(), Some("cipher"));
    }

    #[test]
    fn patch_unknown_conversation_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let result = db.apply_conversation_patch(
            &ConversationId::from("missing"),
            &ConversationPatch {
                last_message: Some("x".into()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(StoreError::NotFound)));
    }
}
