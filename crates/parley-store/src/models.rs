//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP layer and to subscription payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::{ConversationId, MessageId, MessageKind, UserId};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A directory record.  The primary key is the normalized email identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    /// Normalized identifier (e.g. `alice_x_com`).
    pub id: UserId,
    /// Human-readable display name.
    pub display_name: String,
    /// Optional stable media reference for the profile picture.
    pub profile_image_path: Option<String>,
    /// When this identity was first created.
    pub created_at: DateTime<Utc>,
}

/// A directory search hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub id: UserId,
    pub display_name: String,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A two-party conversation.  The participant pair is immutable after
/// creation and stored in canonical (sorted) order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: ConversationId,
    /// Lexicographically smaller participant id.
    pub user_low: UserId,
    /// Lexicographically larger participant id.
    pub user_high: UserId,
    pub created_at: DateTime<Utc>,
    pub last_message: Option<LastMessage>,
}

impl Conversation {
    pub fn participants(&self) -> (&UserId, &UserId) {
        (&self.user_low, &self.user_high)
    }

    pub fn has_participant(&self, user: &UserId) -> bool {
        &self.user_low == user || &self.user_high == user
    }

    /// The counterpart of `user`, assuming `user` is a participant.
    pub fn other_participant(&self, user: &UserId) -> &UserId {
        if &self.user_low == user {
            &self.user_high
        } else {
            &self.user_low
        }
    }
}

/// Denormalized snapshot of the most recent message, kept on the
/// conversation row to drive conversation lists without touching the log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastMessage {
    /// Kind tag: `text`, `photo`, `video`, or `location`.
    pub kind: String,
    /// Short textual preview.
    pub preview: String,
    pub sender: UserId,
    pub sent_at: DateTime<Utc>,
}

/// One entry of a user's conversation list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummary {
    pub id: ConversationId,
    /// The counterpart's id.
    pub other_user: UserId,
    /// The counterpart's display name at listing time.
    pub other_display_name: String,
    pub last_message: Option<LastMessage>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single message as stored in a conversation's log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Client-derived id, unique within the conversation.
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: UserId,
    /// Store-assigned sequence number; the authoritative total order within
    /// the conversation.
    pub seq: u64,
    /// When the message was sent (as reported by the sender).
    pub sent_at: DateTime<Utc>,
    pub kind: MessageKind,
}

impl Message {
    /// The cursor a reader holds after seeing this message.
    pub fn cursor(&self) -> parley_shared::Cursor {
        parley_shared::Cursor {
            seq: self.seq,
            message_id: self.id.clone(),
        }
    }
}

/// A message as submitted for append, before the store assigns `seq`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMessage {
    pub id: MessageId,
    pub sender: UserId,
    pub sent_at: DateTime<Utc>,
    pub kind: MessageKind,
}

/// Result of an append: the stored message plus whether this call actually
/// inserted it.  A duplicate id is a successful no-op with `inserted: false`.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendOutcome {
    pub message: Message,
    pub inserted: bool,
}

/// Result of a create-or-append conversation call.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome {
    pub conversation_id: ConversationId,
    /// `true` when this call created the conversation; `false` when an
    /// existing conversation for the pair was found and the first message
    /// was appended to it instead.
    pub created: bool,
    pub append: AppendOutcome,
}

// ---------------------------------------------------------------------------
// Media reference
// ---------------------------------------------------------------------------

/// Metadata for a registered media upload, keyed by its stable path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    /// Stable reference path (e.g. `message_images/{message_id}.png`).
    pub path: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub created_at: DateTime<Utc>,
}
