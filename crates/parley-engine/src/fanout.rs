//! Per-conversation and per-user broadcast registries.
//!
//! Each conversation with at least one subscriber has a
//! `tokio::sync::broadcast` channel; every successful append is published
//! on it, so all receivers observe the same relative order.  A bounded
//! buffer caps per-subscriber backlog: a receiver that falls behind gets a
//! [`Delivery::Gap`] telling it how many deliveries were dropped.
//!
//! Dropping a subscription handle releases its receiver immediately;
//! sender entries with no remaining receivers are pruned on the next
//! publish or subscribe.

use std::collections::HashMap;

use tokio::sync::{broadcast, Mutex};

use parley_shared::{ConversationId, UserId};
use parley_store::Message;

use crate::events::{ConversationListEvent, Delivery};

/// Bounded per-subscriber backlog; a slower consumer loses the oldest
/// deliveries and is told via `Gap`.
const CHANNEL_CAPACITY: usize = 256;

/// A live subscription to one conversation's message feed.
#[derive(Debug)]
pub struct Subscription {
    conversation_id: ConversationId,
    rx: broadcast::Receiver<Message>,
}

impl Subscription {
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Wait for the next delivery.  Returns `None` once the feed is closed
    /// and fully drained.
    pub async fn next(&mut self) -> Option<Delivery> {
        match self.rx.recv().await {
            Ok(message) => Some(Delivery::Message { message }),
            Err(broadcast::error::RecvError::Lagged(missed)) => Some(Delivery::Gap { missed }),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

/// A live subscription to one user's conversation-list feed.
pub struct ListSubscription {
    user: UserId,
    rx: broadcast::Receiver<ConversationListEvent>,
}

impl ListSubscription {
    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub async fn next(&mut self) -> Option<ConversationListEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                // List events are snapshots; a lagged receiver just picks up
                // at the next event.
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(user = %self.user, missed, "conversation-list feed lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Broadcast registry shared by all engine callers.
pub struct Fanout {
    conversations: Mutex<HashMap<ConversationId, broadcast::Sender<Message>>>,
    lists: Mutex<HashMap<UserId, broadcast::Sender<ConversationListEvent>>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            lists: Mutex::new(HashMap::new()),
        }
    }

    /// Register a receiver on a conversation's feed.  Authorization is the
    /// caller's job.
    pub async fn subscribe(&self, conversation_id: ConversationId) -> Subscription {
        let mut map = self.conversations.lock().await;
        map.retain(|_, tx| tx.receiver_count() > 0);
        let tx = map
            .entry(conversation_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Subscription {
            conversation_id,
            rx: tx.subscribe(),
        }
    }

    /// Register a receiver on a user's conversation-list feed.
    pub async fn subscribe_list(&self, user: UserId) -> ListSubscription {
        let mut map = self.lists.lock().await;
        map.retain(|_, tx| tx.receiver_count() > 0);
        let tx = map
            .entry(user.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        ListSubscription {
            user,
            rx: tx.subscribe(),
        }
    }

    /// Push an appended message to the conversation's subscribers.
    pub async fn publish_message(&self, message: &Message) {
        let mut map = self.conversations.lock().await;
        if let Some(tx) = map.get(&message.conversation_id) {
            if tx.receiver_count() == 0 {
                map.remove(&message.conversation_id);
            } else {
                // Send only fails with zero receivers, checked above.
                let _ = tx.send(message.clone());
            }
        }
    }

    /// Push a conversation-list event to one user's feed.
    pub async fn publish_list_event(&self, user: &UserId, event: ConversationListEvent) {
        let mut map = self.lists.lock().await;
        if let Some(tx) = map.get(user) {
            if tx.receiver_count() == 0 {
                map.remove(user);
            } else {
                let _ = tx.send(event);
            }
        }
    }

    /// Number of live subscribers on a conversation's feed.
    pub async fn subscriber_count(&self, conversation_id: &ConversationId) -> usize {
        let map = self.conversations.lock().await;
        map.get(conversation_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}
