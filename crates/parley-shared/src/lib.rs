//! # parley-shared
//!
//! Domain types shared by every layer of the Parley backend: normalized
//! user identifiers, conversation and message ids, message kinds, and the
//! cursor format used for resumable message listing.
//!
//! The email normalization in [`identity`] is the single definition used by
//! the directory, the conversation store, and the search index.

pub mod identity;
pub mod types;

mod error;

pub use error::SharedError;
pub use identity::normalize_email;
pub use types::{ConversationId, Cursor, MessageId, MessageKind, UserId};
