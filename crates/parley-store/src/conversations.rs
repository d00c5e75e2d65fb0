//! Conversation records and per-user conversation listings.
//!
//! A conversation is keyed by a canonical participant pair: the two
//! normalized ids sorted and joined with `|`.  The UNIQUE constraint on that
//! key resolves the concurrent-create race: the losing creator's insert is
//! a no-op and its first message is appended to the winner's conversation
//! inside the same transaction.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::{ConversationId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::append_with_conn;
use crate::models::{Conversation, ConversationSummary, CreateOutcome, LastMessage, NewMessage};

/// Sort a participant pair into canonical (low, high) order.
pub fn canonical_pair<'a>(a: &'a UserId, b: &'a UserId) -> (&'a UserId, &'a UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Canonical pair key for two participants, order-independent.
pub fn pair_key(a: &UserId, b: &UserId) -> String {
    let (low, high) = canonical_pair(a, b);
    format!("{}|{}", low, high)
}

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a conversation for the participant pair together with its
    /// first message, atomically.
    ///
    /// If a conversation for the pair already exists (including one created
    /// by a concurrent racer), the call is rewritten into an append against
    /// that conversation; the conflict is never surfaced.  In that case the
    /// sender's listing row is re-created, so a user who deleted the
    /// conversation from their own list sees it again when they restart it.
    pub fn create_conversation(
        &mut self,
        a: &UserId,
        b: &UserId,
        first: &NewMessage,
    ) -> Result<CreateOutcome> {
        let key = pair_key(a, b);
        let (low, high) = canonical_pair(a, b);
        let low = low.clone();
        let high = high.clone();

        let tx = self.conn_mut().transaction()?;

        // Compare-and-create on the unique pair key.
        let candidate = ConversationId::new();
        let now = Utc::now().to_rfc3339();
        let created = tx.execute(
            "INSERT INTO conversations (id, pair_key, user_low, user_high, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(pair_key) DO NOTHING",
            params![candidate.to_string(), key, low.as_str(), high.as_str(), now],
        )? > 0;

        let id_str: String = tx.query_row(
            "SELECT id FROM conversations WHERE pair_key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        let conversation_id = ConversationId::parse(&id_str)?;

        if created {
            for user in [&low, &high] {
                tx.execute(
                    "INSERT OR IGNORE INTO user_conversations (user_id, conversation_id)
                     VALUES (?1, ?2)",
                    params![user.as_str(), id_str],
                )?;
            }
        } else {
            // Restarting a previously deleted conversation brings it back
            // into the sender's own list only.
            tx.execute(
                "INSERT OR IGNORE INTO user_conversations (user_id, conversation_id)
                 VALUES (?1, ?2)",
                params![first.sender.as_str(), id_str],
            )?;
        }

        let append = append_with_conn(&tx, &conversation_id, first)?;
        tx.commit()?;

        tracing::debug!(
            conversation = %conversation_id,
            created,
            sender = %first.sender,
            "conversation create-or-append"
        );

        Ok(CreateOutcome {
            conversation_id,
            created,
            append,
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Locate the conversation for a participant pair, argument order
    /// independent.
    pub fn find_conversation(&self, a: &UserId, b: &UserId) -> Result<Option<ConversationId>> {
        let result = self.conn().query_row(
            "SELECT id FROM conversations WHERE pair_key = ?1",
            params![pair_key(a, b)],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(id_str) => Ok(Some(ConversationId::parse(&id_str)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Fetch a single conversation by id.
    pub fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        self.conn()
            .query_row(
                "SELECT id, user_low, user_high, created_at,
                        last_kind, last_preview, last_sender, last_sent_at
                 FROM conversations
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_conversation,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List a user's conversations, most recent activity first.
    ///
    /// Conversations the user deleted from their own list are absent even
    /// when the counterpart still sees them.
    pub fn list_conversations_for_user(&self, user: &UserId) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.user_low, c.user_high, c.created_at,
                    c.last_kind, c.last_preview, c.last_sender, c.last_sent_at,
                    d.display_name
             FROM user_conversations uc
             JOIN conversations c ON c.id = uc.conversation_id
             LEFT JOIN directory d
                 ON d.id = CASE WHEN c.user_low = ?1 THEN c.user_high ELSE c.user_low END
             WHERE uc.user_id = ?1
             ORDER BY COALESCE(c.last_sent_at, c.created_at) DESC",
        )?;

        let rows = stmt.query_map(params![user.as_str()], |row| {
            let conversation = row_to_conversation(row)?;
            let other_display_name: Option<String> = row.get(8)?;
            Ok((conversation, other_display_name))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (conversation, other_display_name) = row?;
            let other = conversation.other_participant(user).clone();
            summaries.push(ConversationSummary {
                id: conversation.id,
                other_display_name: other_display_name.unwrap_or_else(|| other.to_string()),
                other_user: other,
                last_message: conversation.last_message,
                created_at: conversation.created_at,
            });
        }
        Ok(summaries)
    }

    /// Whether the conversation is currently in the user's listing.
    pub fn is_listed_for(&self, id: &ConversationId, user: &UserId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM user_conversations
             WHERE user_id = ?1 AND conversation_id = ?2",
            params![user.as_str(), id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Remove a conversation from one user's listing only.
    ///
    /// Returns `true` if a row was removed.  An already-absent listing is
    /// logged and reported as `false`, never an error.
    pub fn delete_conversation_for_user(
        &self,
        id: &ConversationId,
        user: &UserId,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM user_conversations WHERE user_id = ?1 AND conversation_id = ?2",
            params![user.as_str(), id.to_string()],
        )?;

        if affected == 0 {
            tracing::warn!(
                conversation = %id,
                user = %user,
                "delete requested for a conversation not in the user's list"
            );
        }
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Conversation`].
///
/// Expects columns in the order: id, user_low, user_high, created_at,
/// last_kind, last_preview, last_sender, last_sent_at.
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id_str: String = row.get(0)?;
    let user_low: String = row.get(1)?;
    let user_high: String = row.get(2)?;
    let created_str: String = row.get(3)?;
    let last_kind: Option<String> = row.get(4)?;
    let last_preview: Option<String> = row.get(5)?;
    let last_sender: Option<String> = row.get(6)?;
    let last_sent_str: Option<String> = row.get(7)?;

    let id = ConversationId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    // The snapshot columns are written together; a partial row means no
    // message has been appended yet.
    let last_message = match (last_kind, last_preview, last_sender, last_sent_str) {
        (Some(kind), Some(preview), Some(sender), Some(sent_str)) => {
            let sent_at = DateTime::parse_from_rfc3339(&sent_str)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        7,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
            Some(LastMessage {
                kind,
                preview,
                sender: UserId(sender),
                sent_at,
            })
        }
        _ => None,
    };

    Ok(Conversation {
        id,
        user_low: UserId(user_low),
        user_high: UserId(user_high),
        created_at,
        last_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_shared::{MessageId, MessageKind};

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_identity(&UserId("alice_x_com".into()), "Alice", None)
            .unwrap();
        db.upsert_identity(&UserId("bob_x_com".into()), "Bob", None)
            .unwrap();
        db
    }

    fn text_from(sender: &str, body: &str) -> NewMessage {
        let sent_at = Utc::now();
        NewMessage {
            id: MessageId(format!("{}_{}", sender, sent_at.to_rfc3339())),
            sender: UserId(sender.into()),
            sent_at,
            kind: MessageKind::Text { body: body.into() },
        }
    }

    #[test]
    fn find_is_order_independent() {
        let mut db = db();
        let alice = UserId("alice_x_com".into());
        let bob = UserId("bob_x_com".into());

        let outcome = db
            .create_conversation(&alice, &bob, &text_from("alice_x_com", "hi"))
            .unwrap();
        assert!(outcome.created);

        let found_ab = db.find_conversation(&alice, &bob).unwrap();
        let found_ba = db.find_conversation(&bob, &alice).unwrap();
        assert_eq!(found_ab, Some(outcome.conversation_id));
        assert_eq!(found_ab, found_ba);
    }

    #[test]
    fn second_create_becomes_append() {
        let mut db = db();
        let alice = UserId("alice_x_com".into());
        let bob = UserId("bob_x_com".into());

        let first = db
            .create_conversation(&alice, &bob, &text_from("alice_x_com", "hi"))
            .unwrap();
        let second = db
            .create_conversation(&bob, &alice, &text_from("bob_x_com", "hello"))
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.conversation_id, second.conversation_id);

        let messages = db
            .list_messages(&first.conversation_id, None, 100)
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].seq, 1);
        assert_eq!(messages[1].seq, 2);
    }

    #[test]
    fn listing_shows_counterpart_name_and_snapshot() {
        let mut db = db();
        let alice = UserId("alice_x_com".into());
        let bob = UserId("bob_x_com".into());

        db.create_conversation(&alice, &bob, &text_from("alice_x_com", "hi"))
            .unwrap();

        let for_alice = db.list_conversations_for_user(&alice).unwrap();
        assert_eq!(for_alice.len(), 1);
        assert_eq!(for_alice[0].other_display_name, "Bob");
        let last = for_alice[0].last_message.as_ref().unwrap();
        assert_eq!(last.preview, "hi");
        assert_eq!(last.sender, alice);
    }

    #[test]
    fn delete_is_single_sided() {
        let mut db = db();
        let alice = UserId("alice_x_com".into());
        let bob = UserId("bob_x_com".into());

        let outcome = db
            .create_conversation(&alice, &bob, &text_from("alice_x_com", "hi"))
            .unwrap();
        let id = outcome.conversation_id;

        assert!(db.delete_conversation_for_user(&id, &alice).unwrap());
        assert!(db.list_conversations_for_user(&alice).unwrap().is_empty());

        // Bob still sees the conversation and the message.
        assert_eq!(db.list_conversations_for_user(&bob).unwrap().len(), 1);
        assert_eq!(db.list_messages(&id, None, 100).unwrap().len(), 1);

        // Second delete is a logged no-op.
        assert!(!db.delete_conversation_for_user(&id, &alice).unwrap());
    }

    #[test]
    fn restart_after_delete_restores_own_listing() {
        let mut db = db();
        let alice = UserId("alice_x_com".into());
        let bob = UserId("bob_x_com".into());

        db.create_conversation(&alice, &bob, &text_from("alice_x_com", "hi"))
            .unwrap();
        let id = db.find_conversation(&alice, &bob).unwrap().unwrap();
        db.delete_conversation_for_user(&id, &alice).unwrap();

        let outcome = db
            .create_conversation(&alice, &bob, &text_from("alice_x_com", "again"))
            .unwrap();
        assert!(!outcome.created);
        assert_eq!(outcome.conversation_id, id);
        assert_eq!(db.list_conversations_for_user(&alice).unwrap().len(), 1);
    }
}
