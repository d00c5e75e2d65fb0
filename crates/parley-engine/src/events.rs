//! Payloads pushed to subscribers.

use serde::Serialize;

use parley_shared::ConversationId;
use parley_store::{ConversationSummary, Message};

/// One delivery on a conversation subscription.
///
/// Delivery is at-least-once: after a gap (a subscriber that fell behind
/// the bounded buffer) the client re-lists from its cursor and dedupes by
/// message id.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Delivery {
    /// A message appended to the subscribed conversation, in store order.
    Message { message: Message },
    /// The subscriber fell behind and `missed` deliveries were dropped;
    /// resume from the last cursor to recover them.
    Gap { missed: u64 },
}

/// One delivery on a conversation-list subscription.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConversationListEvent {
    /// A conversation involving the subscriber was created.
    Created { summary: ConversationSummary },
    /// A conversation's last-message snapshot changed.
    Updated { summary: ConversationSummary },
    /// The subscriber removed the conversation from their own list.
    Deleted { conversation_id: ConversationId },
}
