//! # parley-media
//!
//! Media reference resolution for the Parley backend.
//!
//! Uploaded blobs (profile pictures, message photos and videos) are stored
//! on the filesystem under their stable reference path; the reference
//! metadata lives in the store.  Resolution is read-through: no cache sits
//! between a reference and its bytes.

pub mod blob_store;
pub mod resolver;

mod error;

pub use blob_store::BlobStore;
pub use error::MediaError;
pub use resolver::{FetchLocation, MediaResolver};
