//! Upload registration and read-through resolution.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use parley_store::{Database, StoreError};

use crate::blob_store::BlobStore;
use crate::error::MediaError;

/// Where a resolved reference can be fetched from.
#[derive(Debug, Clone, Serialize)]
pub struct FetchLocation {
    /// The stable reference that was resolved.
    pub path: String,
    /// Absolute filesystem location of the bytes.
    pub file_path: PathBuf,
    pub size_bytes: i64,
    pub content_type: Option<String>,
}

/// Associates uploaded blobs with stable reference paths and resolves
/// references back to fetch locations.
///
/// The resolver does not cache: every resolution consults the reference
/// record and the blob store directly.
pub struct MediaResolver {
    blobs: BlobStore,
    store: Arc<Mutex<Database>>,
}

impl MediaResolver {
    pub fn new(blobs: BlobStore, store: Arc<Mutex<Database>>) -> Self {
        Self { blobs, store }
    }

    /// Store the uploaded bytes under `ref_path` and record the reference.
    ///
    /// Returns the stable reference string.  Re-uploading to the same path
    /// overwrites the object, matching client retry behavior.
    pub async fn register_upload(
        &self,
        ref_path: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<String, MediaError> {
        self.blobs.put(ref_path, data).await?;

        {
            let db = self.store.lock().await;
            db.upsert_media_ref(ref_path, data.len() as i64, content_type)?;
        }

        info!(path = %ref_path, size = data.len(), "upload registered");
        Ok(ref_path.to_string())
    }

    /// Resolve a stable reference to a fetch location.
    pub async fn resolve(&self, ref_path: &str) -> Result<FetchLocation, MediaError> {
        let media_ref = {
            let db = self.store.lock().await;
            db.get_media_ref(ref_path).map_err(|e| match e {
                StoreError::NotFound => MediaError::NotFound(ref_path.to_string()),
                other => MediaError::Store(other),
            })?
        };

        // The record may outlive a purged object; report that as NotFound
        // too, never a stale location.
        let file_path = self.blobs.safe_path(ref_path)?;
        if !file_path.exists() {
            return Err(MediaError::NotFound(ref_path.to_string()));
        }

        Ok(FetchLocation {
            path: media_ref.path,
            file_path,
            size_bytes: media_ref.size_bytes,
            content_type: media_ref.content_type,
        })
    }

    /// Read a reference's bytes, read-through.
    pub async fn fetch(&self, ref_path: &str) -> Result<(Vec<u8>, Option<String>), MediaError> {
        let location = self.resolve(ref_path).await?;
        let data = self.blobs.get(ref_path).await?;
        Ok((data, location.content_type))
    }
}
