//! # parley-engine
//!
//! The concurrent service core of the Parley backend.
//!
//! The [`Engine`] owns the durable store and layers the live behavior on
//! top of it:
//!
//! - **session lifecycle** -- tokens issued at login, invalidated at logout;
//!   every user-scoped operation takes the authenticated identity
//!   explicitly, never ambient state
//! - **fan-out** -- per-conversation broadcast of appended messages, in
//!   store order, at-least-once, plus per-user conversation-list feeds
//! - **write serialization** -- appends for a conversation are serialized
//!   through the store lock, and delivery is published before the lock is
//!   released so every subscriber observes the store's `seq` order
//! - **bounded retry** -- transient storage errors (busy/locked) are
//!   retried with jittered backoff before surfacing as `Unavailable`

pub mod engine;
pub mod events;
pub mod fanout;
pub mod session;

mod error;
mod retry;

pub use engine::{new_message_now, Engine};
pub use error::EngineError;
pub use events::{ConversationListEvent, Delivery};
pub use fanout::{ListSubscription, Subscription};
pub use session::{Session, SessionManager};
