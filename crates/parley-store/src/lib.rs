//! # parley-store
//!
//! Durable state for the Parley backend, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every domain
//! record: the user directory, conversations with their append-only message
//! logs, media references, and the name search index.
//!
//! Writes that must be atomic (conversation creation together with its
//! first message, message append plus the last-message snapshot) run inside
//! a single transaction.  Per-conversation message order is authoritative
//! here: a `seq` column assigned at append time.

pub mod conversations;
pub mod database;
pub mod directory;
pub mod media_refs;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod search;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
