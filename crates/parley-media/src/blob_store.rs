//! Filesystem blob storage keyed by stable reference paths.
//!
//! Reference paths are client-shaped, e.g.
//! `images/alice_x_com_profile_picture.png` or
//! `message_images/{message_id}.png`.  Every path is validated against
//! traversal before it touches the filesystem.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::error::MediaError;

/// Verify that a resolved path stays within the expected base directory.
/// Prevents path traversal attacks.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, MediaError> {
    // Canonicalize base; target may not exist yet so normalize manually
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(&canonical_base)
        .unwrap_or(target)
        .components()
    {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(MediaError::InvalidPath(target.display().to_string()));
            }
            _ => {} // RootDir, CurDir, Prefix — skip
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(MediaError::InvalidPath(target.display().to_string()));
    }
    Ok(resolved)
}

/// Reject reference paths that could escape the base directory or abuse
/// separators.  At most one directory level is allowed
/// (`message_images/{id}.png`), matching the client's naming scheme.
fn validate_ref_path(path: &str) -> Result<(), MediaError> {
    if path.is_empty()
        || path.contains('\\')
        || path.contains("..")
        || path.starts_with('/')
        || path.ends_with('/')
        || path.matches('/').count() > 1
    {
        return Err(MediaError::InvalidPath(path.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    max_size: usize,
}

impl BlobStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, MediaError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            MediaError::UploadFailed(format!(
                "Failed to create media directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "media blob store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Write a blob under its stable reference path, overwriting any
    /// previous object at that path.
    pub async fn put(&self, ref_path: &str, data: &[u8]) -> Result<(), MediaError> {
        if data.is_empty() {
            return Err(MediaError::UploadFailed("Empty blob".to_string()));
        }
        if data.len() > self.max_size {
            return Err(MediaError::TooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let path = self.safe_path(ref_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                MediaError::UploadFailed(format!("Failed to create '{}': {}", parent.display(), e))
            })?;
        }

        fs::write(&path, data).await.map_err(|e| {
            MediaError::UploadFailed(format!("Failed to write blob {}: {}", ref_path, e))
        })?;

        debug!(path = %ref_path, size = data.len(), "stored blob");
        Ok(())
    }

    /// Read a blob's bytes.
    pub async fn get(&self, ref_path: &str) -> Result<Vec<u8>, MediaError> {
        let path = self.safe_path(ref_path)?;

        if !path.exists() {
            return Err(MediaError::NotFound(ref_path.to_string()));
        }

        let data = fs::read(&path).await.map_err(|e| {
            MediaError::UploadFailed(format!("Failed to read blob {}: {}", ref_path, e))
        })?;

        debug!(path = %ref_path, size = data.len(), "retrieved blob");
        Ok(data)
    }

    /// Whether a blob exists at the reference path.
    pub fn exists(&self, ref_path: &str) -> Result<bool, MediaError> {
        Ok(self.safe_path(ref_path)?.exists())
    }

    /// Delete a blob.
    pub async fn delete(&self, ref_path: &str) -> Result<(), MediaError> {
        let path = self.safe_path(ref_path)?;

        if !path.exists() {
            return Err(MediaError::NotFound(ref_path.to_string()));
        }

        fs::remove_file(&path).await.map_err(|e| {
            MediaError::UploadFailed(format!("Failed to delete blob {}: {}", ref_path, e))
        })?;

        debug!(path = %ref_path, "deleted blob");
        Ok(())
    }

    /// Absolute on-disk location of a reference path, traversal-checked.
    pub fn safe_path(&self, ref_path: &str) -> Result<PathBuf, MediaError> {
        validate_ref_path(ref_path)?;
        let raw = self.base_path.join(ref_path);
        ensure_within(&self.base_path, &raw)
    }
}
