use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    /// The backing object write failed.
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// The reference was never registered or the object was purged.
    #[error("Media reference not found: {0}")]
    NotFound(String),

    /// The reference path contains traversal or separator abuse.
    #[error("Invalid media path: {0}")]
    InvalidPath(String),

    /// Blob larger than the configured cap.
    #[error("Blob too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    /// Store-layer failure while recording or resolving the reference.
    #[error("Store error: {0}")]
    Store(#[from] parley_store::StoreError),
}
