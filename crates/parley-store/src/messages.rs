//! Append-only message logs.
//!
//! Each conversation's log carries a `seq` column assigned at append time
//! inside the insert statement; it is the authoritative total order for the
//! conversation.  Appending an id that is already present is an idempotent
//! no-op reported through [`AppendOutcome::inserted`].

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use parley_shared::{ConversationId, Cursor, MessageId, MessageKind, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{AppendOutcome, Message, NewMessage};

impl Database {
    /// Append a message to a conversation's log.
    ///
    /// Fails with [`StoreError::NotFound`] for an unknown conversation and
    /// [`StoreError::NotParticipant`] when the sender is not in the
    /// participant pair.  A duplicate message id leaves the log unchanged
    /// and reports `inserted: false`.
    pub fn append_message(
        &mut self,
        conversation_id: &ConversationId,
        message: &NewMessage,
    ) -> Result<AppendOutcome> {
        let tx = self.conn_mut().transaction()?;
        let outcome = append_with_conn(&tx, conversation_id, message)?;
        tx.commit()?;
        Ok(outcome)
    }

    /// List messages in append order, optionally resuming after a cursor.
    pub fn list_messages(
        &self,
        conversation_id: &ConversationId,
        after: Option<&Cursor>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        // An unknown conversation is an error, not an empty log.
        self.participants(conversation_id)?;

        let after_seq = after.map(|c| c.seq).unwrap_or(0);
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id, id, seq, sender, sent_at, kind_json
             FROM messages
             WHERE conversation_id = ?1 AND seq > ?2
             ORDER BY seq ASC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(
            params![conversation_id.to_string(), after_seq, limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Fetch a single message by conversation and message id.
    pub fn get_message(
        &self,
        conversation_id: &ConversationId,
        id: &MessageId,
    ) -> Result<Message> {
        get_message_with_conn(self.conn(), conversation_id, id)
    }

    /// The participant pair of a conversation, or [`StoreError::NotFound`].
    pub fn participants(&self, conversation_id: &ConversationId) -> Result<(UserId, UserId)> {
        participants_with_conn(self.conn(), conversation_id)
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers, shared with the conversation create path so the
// create-or-append transaction reuses the exact same append logic.
// ---------------------------------------------------------------------------

pub(crate) fn participants_with_conn(
    conn: &Connection,
    conversation_id: &ConversationId,
) -> Result<(UserId, UserId)> {
    conn.query_row(
        "SELECT user_low, user_high FROM conversations WHERE id = ?1",
        params![conversation_id.to_string()],
        |row| {
            let low: String = row.get(0)?;
            let high: String = row.get(1)?;
            Ok((UserId(low), UserId(high)))
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    })
}

pub(crate) fn append_with_conn(
    conn: &Connection,
    conversation_id: &ConversationId,
    message: &NewMessage,
) -> Result<AppendOutcome> {
    let (low, high) = participants_with_conn(conn, conversation_id)?;
    if message.sender != low && message.sender != high {
        return Err(StoreError::NotParticipant);
    }

    let kind_json = serde_json::to_string(&message.kind)?;

    // seq is assigned inside the insert; the UNIQUE (conversation_id, seq)
    // constraint plus the surrounding transaction make it gapless and
    // monotonic.  INSERT OR IGNORE makes the duplicate-id append a no-op.
    let affected = conn.execute(
        "INSERT OR IGNORE INTO messages (conversation_id, id, seq, sender, sent_at, kind_json)
         VALUES (
             ?1, ?2,
             (SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?1),
             ?3, ?4, ?5
         )",
        params![
            conversation_id.to_string(),
            message.id.as_str(),
            message.sender.as_str(),
            message.sent_at.to_rfc3339(),
            kind_json,
        ],
    )?;
    let inserted = affected > 0;

    let stored = get_message_with_conn(conn, conversation_id, &message.id)?;

    if inserted {
        conn.execute(
            "UPDATE conversations
             SET last_kind = ?2, last_preview = ?3, last_sender = ?4, last_sent_at = ?5
             WHERE id = ?1",
            params![
                conversation_id.to_string(),
                message.kind.tag(),
                message.kind.preview(),
                message.sender.as_str(),
                message.sent_at.to_rfc3339(),
            ],
        )?;
    } else {
        tracing::debug!(
            conversation = %conversation_id,
            message = %message.id,
            "duplicate append ignored"
        );
    }

    Ok(AppendOutcome {
        message: stored,
        inserted,
    })
}

fn get_message_with_conn(
    conn: &Connection,
    conversation_id: &ConversationId,
    id: &MessageId,
) -> Result<Message> {
    conn.query_row(
        "SELECT conversation_id, id, seq, sender, sent_at, kind_json
         FROM messages
         WHERE conversation_id = ?1 AND id = ?2",
        params![conversation_id.to_string(), id.as_str()],
        row_to_message,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    })
}

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let conversation_str: String = row.get(0)?;
    let id: String = row.get(1)?;
    let seq: i64 = row.get(2)?;
    let sender: String = row.get(3)?;
    let sent_str: String = row.get(4)?;
    let kind_json: String = row.get(5)?;

    let conversation_id = ConversationId::parse(&conversation_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let sent_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&sent_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let kind: MessageKind = serde_json::from_str(&kind_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Message {
        id: MessageId(id),
        conversation_id,
        sender: UserId(sender),
        seq: seq as u64,
        sent_at,
        kind,
    })
}
