use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Empty email address")]
    EmptyEmail,

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
}
