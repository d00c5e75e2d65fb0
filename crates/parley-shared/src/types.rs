use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SharedError;

// User identity = normalized email (lowercase, separators replaced)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message identifier, unique within its conversation.
///
/// Clients derive it deterministically from sender, recipient, and send
/// timestamp, which makes duplicate appends after a reconnect detectable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    /// Deterministic id derivation used by clients:
    /// `{recipient}_{sender}_{sent-at RFC-3339}`.
    pub fn derive(sender: &UserId, recipient: &UserId, sent_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self(format!("{}_{}_{}", recipient, sender, sent_at.to_rfc3339()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message payload variants.
///
/// Photo and video messages carry a stable media reference (an opaque path
/// resolvable through the media resolver), never a raw URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    Text { body: String },
    PhotoRef { path: String },
    VideoRef { path: String },
    Location { latitude: f64, longitude: f64 },
}

impl MessageKind {
    /// Short preview used for the conversation list's last-message snapshot.
    pub fn preview(&self) -> String {
        match self {
            MessageKind::Text { body } => body.clone(),
            MessageKind::PhotoRef { .. } => "[photo]".to_string(),
            MessageKind::VideoRef { .. } => "[video]".to_string(),
            MessageKind::Location { .. } => "[location]".to_string(),
        }
    }

    /// Tag stored alongside the snapshot.
    pub fn tag(&self) -> &'static str {
        match self {
            MessageKind::Text { .. } => "text",
            MessageKind::PhotoRef { .. } => "photo",
            MessageKind::VideoRef { .. } => "video",
            MessageKind::Location { .. } => "location",
        }
    }
}

/// Opaque resume marker for message listing.
///
/// Encodes the per-conversation sequence number and the id of the last seen
/// message as `{seq}:{message_id}`.  Clients treat it as an opaque string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cursor {
    pub seq: u64,
    pub message_id: MessageId,
}

impl Cursor {
    pub fn encode(&self) -> String {
        format!("{}:{}", self.seq, self.message_id)
    }

    pub fn decode(s: &str) -> Result<Self, SharedError> {
        let (seq_part, id_part) = s
            .split_once(':')
            .ok_or_else(|| SharedError::InvalidCursor(s.to_string()))?;
        let seq: u64 = seq_part
            .parse()
            .map_err(|_| SharedError::InvalidCursor(s.to_string()))?;
        if id_part.is_empty() {
            return Err(SharedError::InvalidCursor(s.to_string()));
        }
        Ok(Self {
            seq,
            message_id: MessageId(id_part.to_string()),
        })
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trip() {
        let cursor = Cursor {
            seq: 42,
            message_id: MessageId("bob_x_com_alice_x_com_2026-01-01T00:00:00+00:00".into()),
        };
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn cursor_rejects_garbage() {
        assert!(Cursor::decode("no-separator").is_err());
        assert!(Cursor::decode("notanumber:id").is_err());
        assert!(Cursor::decode("7:").is_err());
    }

    #[test]
    fn kind_previews() {
        let kind = MessageKind::PhotoRef {
            path: "message_images/m1.png".into(),
        };
        assert_eq!(kind.preview(), "[photo]");
        assert_eq!(kind.tag(), "photo");
    }
}
