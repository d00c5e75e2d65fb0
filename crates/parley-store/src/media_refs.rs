//! Media reference records.
//!
//! The store keeps only the reference metadata; the bytes live in the
//! filesystem blob store owned by the media crate.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::MediaRef;

impl Database {
    /// Record (or re-record) a registered upload.  Re-uploading to the same
    /// path overwrites the metadata, matching the blob overwrite.
    pub fn upsert_media_ref(
        &self,
        path: &str,
        size_bytes: i64,
        content_type: Option<&str>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO media_refs (path, size_bytes, content_type, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                 size_bytes   = excluded.size_bytes,
                 content_type = excluded.content_type",
            params![path, size_bytes, content_type, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Fetch a media reference by its stable path.
    pub fn get_media_ref(&self, path: &str) -> Result<MediaRef> {
        self.conn()
            .query_row(
                "SELECT path, size_bytes, content_type, created_at
                 FROM media_refs
                 WHERE path = ?1",
                params![path],
                row_to_media_ref,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Remove a media reference.  Returns `true` if a row was deleted.
    pub fn delete_media_ref(&self, path: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM media_refs WHERE path = ?1", params![path])?;
        Ok(affected > 0)
    }
}

fn row_to_media_ref(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaRef> {
    let path: String = row.get(0)?;
    let size_bytes: i64 = row.get(1)?;
    let content_type: Option<String> = row.get(2)?;
    let created_str: String = row.get(3)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(MediaRef {
        path,
        size_bytes,
        content_type,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_resolve() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_media_ref("message_images/m1.png", 1024, Some("image/png"))
            .unwrap();

        let media = db.get_media_ref("message_images/m1.png").unwrap();
        assert_eq!(media.size_bytes, 1024);
        assert_eq!(media.content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn missing_ref_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.get_media_ref("message_videos/missing.mov").unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn reupload_overwrites_metadata() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_media_ref("images/a_profile_picture.png", 10, Some("image/png"))
            .unwrap();
        db.upsert_media_ref("images/a_profile_picture.png", 20, Some("image/png"))
            .unwrap();
        assert_eq!(db.get_media_ref("images/a_profile_picture.png").unwrap().size_bytes, 20);
    }
}
