//! The engine: store access, authorization, retry, and fan-out wiring.
//!
//! Every operation that acts for a user takes the authenticated [`UserId`]
//! explicitly.  Appends publish their deliveries while the store lock is
//! still held, so subscribers observe exactly the store's `seq` order.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use parley_shared::{normalize_email, ConversationId, Cursor, UserId};
use parley_store::{
    Conversation, ConversationSummary, CreateOutcome, Database, DirectoryEntry, Identity,
    Message, NewMessage, StoreError,
};

use crate::error::{EngineError, Result};
use crate::events::ConversationListEvent;
use crate::fanout::{Fanout, ListSubscription, Subscription};
use crate::retry;
use crate::session::{Session, SessionManager};

/// Default page size for message listing when the caller does not give one.
pub const DEFAULT_LIST_LIMIT: u32 = 200;

pub struct Engine {
    store: Arc<Mutex<Database>>,
    fanout: Fanout,
    sessions: SessionManager,
}

impl Engine {
    pub fn new(store: Arc<Mutex<Database>>) -> Self {
        Self {
            store,
            fanout: Fanout::new(),
            sessions: SessionManager::new(),
        }
    }

    /// The shared store handle (also used by the media resolver).
    pub fn store(&self) -> Arc<Mutex<Database>> {
        self.store.clone()
    }

    // ------------------------------------------------------------------
    // Sessions & directory
    // ------------------------------------------------------------------

    /// Log a user in: normalize the email, upsert the directory record,
    /// issue a session.
    pub async fn login(
        &self,
        email: &str,
        display_name: &str,
        profile_image_path: Option<&str>,
    ) -> Result<Session> {
        let user = normalize_email(email).map_err(|_| EngineError::InvalidEmail)?;

        let name = display_name.to_string();
        let image = profile_image_path.map(str::to_string);
        let id = user.clone();
        self.with_store_retry(move |db| db.upsert_identity(&id, &name, image.as_deref()))
            .await?;

        let session = self.sessions.issue(user).await;
        tracing::info!(user = %session.user, "login");
        Ok(session)
    }

    /// Invalidate a session.  Idempotent.
    pub async fn logout(&self, token: &Uuid) -> bool {
        let revoked = self.sessions.revoke(token).await;
        if revoked {
            tracing::info!(token = %token, "logout");
        }
        revoked
    }

    /// Resolve a bearer token to its user.
    pub async fn authenticate(&self, token: &Uuid) -> Result<UserId> {
        self.sessions
            .authenticate(token)
            .await
            .ok_or(EngineError::UnknownSession)
    }

    pub async fn identity_exists(&self, id: &UserId) -> Result<bool> {
        let id = id.clone();
        self.with_store_retry(move |db| db.identity_exists(&id)).await
    }

    pub async fn get_identity(&self, id: &UserId) -> Result<Identity> {
        let id = id.clone();
        self.with_store_retry(move |db| db.get_identity(&id)).await
    }

    /// Prefix search over display names, requester excluded.
    pub async fn search(&self, term: &str, excluding: &UserId) -> Result<Vec<DirectoryEntry>> {
        let term = term.to_string();
        let excluding = excluding.clone();
        self.with_store_retry(move |db| db.search_by_name_prefix(&term, &excluding))
            .await
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// Locate the conversation between two users, argument order
    /// independent.
    pub async fn find_conversation(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Option<ConversationId>> {
        let (a, b) = (a.clone(), b.clone());
        self.with_store_retry(move |db| db.find_conversation(&a, &b)).await
    }

    /// Create a conversation with its first message, or append to the
    /// existing one for the pair.  The conflict path is internal; callers
    /// always get a conversation id back.
    pub async fn start_conversation(
        &self,
        sender: &UserId,
        other: &UserId,
        first: NewMessage,
    ) -> Result<CreateOutcome> {
        if &first.sender != sender {
            return Err(EngineError::NotParticipant);
        }

        let mut attempt = 0;
        loop {
            let result = self.start_conversation_once(sender, other, &first).await;
            match result {
                Err(e) if e.is_transient() && attempt + 1 < retry::MAX_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "transient storage error, retrying");
                    tokio::time::sleep(retry::backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
                Ok(outcome) => return Ok(outcome),
            }
        }
    }

    async fn start_conversation_once(
        &self,
        sender: &UserId,
        other: &UserId,
        first: &NewMessage,
    ) -> std::result::Result<CreateOutcome, StoreError> {
        let mut db = self.store.lock().await;
        let outcome = db.create_conversation(sender, other, first)?;

        if outcome.append.inserted {
            // Publish under the store guard so delivery order matches seq.
            self.fanout.publish_message(&outcome.append.message).await;

            let conversation = db.get_conversation(&outcome.conversation_id)?;
            for user in [conversation.user_low.clone(), conversation.user_high.clone()] {
                if !db.is_listed_for(&outcome.conversation_id, &user)? {
                    continue;
                }
                let summary = summary_for(&db, &conversation, &user)?;
                let event = if outcome.created {
                    ConversationListEvent::Created { summary }
                } else {
                    ConversationListEvent::Updated { summary }
                };
                self.fanout.publish_list_event(&user, event).await;
            }
        }

        Ok(outcome)
    }

    /// List a user's conversations, most recent activity first.
    pub async fn list_conversations(&self, user: &UserId) -> Result<Vec<ConversationSummary>> {
        let user = user.clone();
        self.with_store_retry(move |db| db.list_conversations_for_user(&user))
            .await
    }

    /// Remove a conversation from the acting user's list only.
    ///
    /// Best-effort: an already-absent listing reports `false`, never an
    /// error.
    pub async fn delete_conversation(
        &self,
        user: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<bool> {
        let id = *conversation_id;
        let acting = user.clone();
        let removed = self
            .with_store_retry(move |db| db.delete_conversation_for_user(&id, &acting))
            .await?;

        if removed {
            self.fanout
                .publish_list_event(
                    user,
                    ConversationListEvent::Deleted {
                        conversation_id: *conversation_id,
                    },
                )
                .await;
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Append a message and fan it out to subscribers.
    ///
    /// Idempotent per message id; a duplicate append returns the stored
    /// message without redelivering it.
    pub async fn append_message(
        &self,
        sender: &UserId,
        conversation_id: &ConversationId,
        message: NewMessage,
    ) -> Result<Message> {
        if &message.sender != sender {
            return Err(EngineError::NotParticipant);
        }

        let mut attempt = 0;
        loop {
            let result = self.append_message_once(conversation_id, &message).await;
            match result {
                Err(e) if e.is_transient() && attempt + 1 < retry::MAX_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "transient storage error, retrying");
                    tokio::time::sleep(retry::backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
                Ok(message) => return Ok(message),
            }
        }
    }

    async fn append_message_once(
        &self,
        conversation_id: &ConversationId,
        message: &NewMessage,
    ) -> std::result::Result<Message, StoreError> {
        let mut db = self.store.lock().await;
        let outcome = db.append_message(conversation_id, message)?;

        if outcome.inserted {
            self.fanout.publish_message(&outcome.message).await;

            let conversation = db.get_conversation(conversation_id)?;
            for user in [conversation.user_low.clone(), conversation.user_high.clone()] {
                if !db.is_listed_for(conversation_id, &user)? {
                    continue;
                }
                let summary = summary_for(&db, &conversation, &user)?;
                self.fanout
                    .publish_list_event(&user, ConversationListEvent::Updated { summary })
                    .await;
            }
        }

        Ok(outcome.message)
    }

    /// List messages in append order, resumable from a cursor.  Only
    /// participants may read the log.
    pub async fn list_messages(
        &self,
        user: &UserId,
        conversation_id: &ConversationId,
        after: Option<Cursor>,
        limit: Option<u32>,
    ) -> Result<Vec<Message>> {
        let user = user.clone();
        let id = *conversation_id;
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        self.with_store_retry(move |db| {
            let (low, high) = db.participants(&id)?;
            if user != low && user != high {
                return Err(StoreError::NotParticipant);
            }
            db.list_messages(&id, after.as_ref(), limit)
        })
        .await
    }

    /// The other participant of a conversation, from the acting user's
    /// point of view.
    pub async fn counterpart(
        &self,
        user: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<UserId> {
        let (low, high) = {
            let db = self.store.lock().await;
            db.participants(conversation_id)?
        };
        if user == &low {
            Ok(high)
        } else if user == &high {
            Ok(low)
        } else {
            Err(EngineError::NotParticipant)
        }
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe to a conversation's live message feed.
    pub async fn subscribe(
        &self,
        user: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<Subscription> {
        let (low, high) = {
            let db = self.store.lock().await;
            db.participants(conversation_id)?
        };
        if user != &low && user != &high {
            return Err(EngineError::NotParticipant);
        }
        Ok(self.fanout.subscribe(*conversation_id).await)
    }

    /// Subscribe to a user's live conversation-list feed.
    pub async fn subscribe_conversation_list(&self, user: &UserId) -> ListSubscription {
        self.fanout.subscribe_list(user.clone()).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Run a store operation with bounded retry of transient errors.
    async fn with_store_retry<T>(
        &self,
        op: impl Fn(&mut Database) -> std::result::Result<T, StoreError>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            let result = {
                let mut db = self.store.lock().await;
                op(&mut db)
            };
            match result {
                Err(e) if e.is_transient() && attempt + 1 < retry::MAX_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "transient storage error, retrying");
                    tokio::time::sleep(retry::backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
                Ok(value) => return Ok(value),
            }
        }
    }
}

/// Build one user's view of a conversation for a list event.
fn summary_for(
    db: &Database,
    conversation: &Conversation,
    user: &UserId,
) -> std::result::Result<ConversationSummary, StoreError> {
    let other = conversation.other_participant(user).clone();
    let other_display_name = match db.get_identity(&other) {
        Ok(identity) => identity.display_name,
        Err(StoreError::NotFound) => other.to_string(),
        Err(e) => return Err(e),
    };
    Ok(ConversationSummary {
        id: conversation.id,
        other_user: other,
        other_display_name,
        last_message: conversation.last_message.clone(),
        created_at: conversation.created_at,
    })
}

/// Build a [`NewMessage`] stamped now, deriving the id the way clients do.
pub fn new_message_now(
    sender: &UserId,
    recipient: &UserId,
    kind: parley_shared::MessageKind,
) -> NewMessage {
    let sent_at = Utc::now();
    NewMessage {
        id: parley_shared::MessageId::derive(sender, recipient, sent_at),
        sender: sender.clone(),
        sent_at,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::{MessageId, MessageKind};
    use std::sync::Arc;

    use crate::events::Delivery;

    async fn engine() -> Engine {
        let db = Database::open_in_memory().unwrap();
        db.upsert_identity(&UserId("alice_x_com".into()), "Alice", None)
            .unwrap();
        db.upsert_identity(&UserId("bob_x_com".into()), "Bob", None)
            .unwrap();
        Engine::new(Arc::new(Mutex::new(db)))
    }

    fn alice() -> UserId {
        UserId("alice_x_com".into())
    }

    fn bob() -> UserId {
        UserId("bob_x_com".into())
    }

    fn text(sender: &UserId, id: &str, body: &str) -> NewMessage {
        NewMessage {
            id: MessageId(id.into()),
            sender: sender.clone(),
            sent_at: Utc::now(),
            kind: MessageKind::Text { body: body.into() },
        }
    }

    #[tokio::test]
    async fn login_issues_session_and_directory_record() {
        let engine = engine().await;
        let session = engine.login("carol@x.com", "Carol", None).await.unwrap();

        assert_eq!(session.user, UserId("carol_x_com".into()));
        assert!(engine.identity_exists(&session.user).await.unwrap());
        assert_eq!(
            engine.authenticate(&session.token).await.unwrap(),
            session.user
        );

        assert!(engine.logout(&session.token).await);
        assert!(matches!(
            engine.authenticate(&session.token).await.unwrap_err(),
            EngineError::UnknownSession
        ));
    }

    #[tokio::test]
    async fn end_to_end_scenario() {
        let engine = engine().await;

        let outcome = engine
            .start_conversation(&alice(), &bob(), text(&alice(), "m0", "hi"))
            .await
            .unwrap();
        assert!(outcome.created);
        let c1 = outcome.conversation_id;

        // Find is argument-order independent.
        assert_eq!(
            engine.find_conversation(&bob(), &alice()).await.unwrap(),
            Some(c1)
        );

        let messages = engine
            .list_messages(&bob(), &c1, None, None)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, alice());
        assert_eq!(
            messages[0].kind,
            MessageKind::Text { body: "hi".into() }
        );
    }

    #[tokio::test]
    async fn concurrent_creates_converge() {
        let engine = Arc::new(engine().await);

        let e1 = engine.clone();
        let e2 = engine.clone();
        let t1 = tokio::spawn(async move {
            e1.start_conversation(&alice(), &bob(), text(&alice(), "m-a", "from alice"))
                .await
        });
        let t2 = tokio::spawn(async move {
            e2.start_conversation(&bob(), &alice(), text(&bob(), "m-b", "from bob"))
                .await
        });

        let o1 = t1.await.unwrap().unwrap();
        let o2 = t2.await.unwrap().unwrap();

        assert_eq!(o1.conversation_id, o2.conversation_id);
        assert_eq!(
            [o1.created, o2.created].iter().filter(|c| **c).count(),
            1,
            "exactly one caller creates"
        );

        let messages = engine
            .list_messages(&alice(), &o1.conversation_id, None, None)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn subscribers_observe_appends_in_order() {
        let engine = engine().await;
        let outcome = engine
            .start_conversation(&alice(), &bob(), text(&alice(), "m0", "hi"))
            .await
            .unwrap();
        let id = outcome.conversation_id;

        let mut sub_alice = engine.subscribe(&alice(), &id).await.unwrap();
        let mut sub_bob = engine.subscribe(&bob(), &id).await.unwrap();

        engine
            .append_message(&bob(), &id, text(&bob(), "m1", "one"))
            .await
            .unwrap();
        engine
            .append_message(&alice(), &id, text(&alice(), "m2", "two"))
            .await
            .unwrap();

        for sub in [&mut sub_alice, &mut sub_bob] {
            let mut seen = Vec::new();
            for _ in 0..2 {
                match sub.next().await {
                    Some(Delivery::Message { message }) => seen.push(message.id.0.clone()),
                    other => panic!("unexpected delivery: {other:?}"),
                }
            }
            assert_eq!(seen, vec!["m1".to_string(), "m2".to_string()]);
        }
    }

    #[tokio::test]
    async fn duplicate_append_not_redelivered() {
        let engine = engine().await;
        let outcome = engine
            .start_conversation(&alice(), &bob(), text(&alice(), "m0", "hi"))
            .await
            .unwrap();
        let id = outcome.conversation_id;

        let mut sub = engine.subscribe(&bob(), &id).await.unwrap();

        engine
            .append_message(&alice(), &id, text(&alice(), "m1", "one"))
            .await
            .unwrap();
        engine
            .append_message(&alice(), &id, text(&alice(), "m1", "one"))
            .await
            .unwrap();
        engine
            .append_message(&alice(), &id, text(&alice(), "m2", "two"))
            .await
            .unwrap();

        match sub.next().await {
            Some(Delivery::Message { message }) => assert_eq!(message.id.0, "m1"),
            other => panic!("unexpected delivery: {other:?}"),
        }
        match sub.next().await {
            Some(Delivery::Message { message }) => assert_eq!(message.id.0, "m2"),
            other => panic!("unexpected delivery: {other:?}"),
        }
    }

    #[tokio::test]
    async fn outsiders_rejected() {
        let engine = engine().await;
        let mallory = UserId("mallory_x_com".into());

        let outcome = engine
            .start_conversation(&alice(), &bob(), text(&alice(), "m0", "hi"))
            .await
            .unwrap();
        let id = outcome.conversation_id;

        assert!(matches!(
            engine
                .append_message(&mallory, &id, text(&mallory, "m1", "hi"))
                .await
                .unwrap_err(),
            EngineError::NotParticipant
        ));
        assert!(matches!(
            engine.subscribe(&mallory, &id).await.unwrap_err(),
            EngineError::NotParticipant
        ));
        assert!(matches!(
            engine
                .list_messages(&mallory, &id, None, None)
                .await
                .unwrap_err(),
            EngineError::NotParticipant
        ));
    }

    #[tokio::test]
    async fn delete_emits_event_for_deleting_user_only() {
        let engine = engine().await;
        let outcome = engine
            .start_conversation(&alice(), &bob(), text(&alice(), "m0", "hi"))
            .await
            .unwrap();
        let id = outcome.conversation_id;

        let mut alice_list = engine.subscribe_conversation_list(&alice()).await;

        assert!(engine.delete_conversation(&alice(), &id).await.unwrap());
        match alice_list.next().await {
            Some(ConversationListEvent::Deleted { conversation_id }) => {
                assert_eq!(conversation_id, id)
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Bob's view is untouched.
        let bob_view = engine.list_conversations(&bob()).await.unwrap();
        assert_eq!(bob_view.len(), 1);

        // Deleting again is a false outcome, not an error.
        assert!(!engine.delete_conversation(&alice(), &id).await.unwrap());
    }

    #[tokio::test]
    async fn list_feed_sees_new_conversation() {
        let engine = engine().await;
        let mut bob_list = engine.subscribe_conversation_list(&bob()).await;

        engine
            .start_conversation(&alice(), &bob(), text(&alice(), "m0", "hi"))
            .await
            .unwrap();

        match bob_list.next().await {
            Some(ConversationListEvent::Created { summary }) => {
                assert_eq!(summary.other_user, alice());
                assert_eq!(summary.other_display_name, "Alice");
                assert_eq!(summary.last_message.unwrap().preview, "hi");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn search_goes_through_engine() {
        let engine = engine().await;
        let hits = engine.search("bo", &alice()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, bob());

        assert!(engine.search("", &alice()).await.unwrap().is_empty());
    }
}
