use thiserror::Error;

use parley_store::StoreError;

/// Errors surfaced by engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Conversation, identity, or message absent.
    #[error("Record not found")]
    NotFound,

    /// The acting user is not in the conversation's participant set.
    #[error("Not a participant of this conversation")]
    NotParticipant,

    /// The session token is unknown or was invalidated.
    #[error("Unknown or expired session")]
    UnknownSession,

    /// The storage layer stayed unavailable through the retry budget.
    #[error("Storage temporarily unavailable")]
    Unavailable,

    /// Malformed email at login.
    #[error("Invalid email address")]
    InvalidEmail,

    /// Any other storage failure.
    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => EngineError::NotFound,
            StoreError::NotParticipant => EngineError::NotParticipant,
            other if other.is_transient() => EngineError::Unavailable,
            other => EngineError::Store(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
