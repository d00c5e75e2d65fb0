//! Directory operations for [`Identity`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Identity;

impl Database {
    /// Create or update a directory record.
    ///
    /// Never fails on duplicate: an existing record is updated in place,
    /// and an update that changes nothing is a no-op (the row is left
    /// untouched, including `updated_at`).
    pub fn upsert_identity(
        &self,
        id: &UserId,
        display_name: &str,
        profile_image_path: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO directory (id, display_name, display_name_lc, profile_image, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 display_name    = excluded.display_name,
                 display_name_lc = excluded.display_name_lc,
                 profile_image   = excluded.profile_image,
                 updated_at      = excluded.updated_at
             WHERE directory.display_name IS NOT excluded.display_name
                OR directory.profile_image IS NOT excluded.profile_image",
            params![
                id.as_str(),
                display_name,
                display_name.to_lowercase(),
                profile_image_path,
                now,
            ],
        )?;
        Ok(())
    }

    /// Whether a directory record exists for `id`.
    pub fn identity_exists(&self, id: &UserId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM directory WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Fetch a single directory record.
    pub fn get_identity(&self, id: &UserId) -> Result<Identity> {
        self.conn()
            .query_row(
                "SELECT id, display_name, profile_image, created_at
                 FROM directory
                 WHERE id = ?1",
                params![id.as_str()],
                row_to_identity,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }
}

/// Map a `rusqlite::Row` to an [`Identity`].
fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Identity> {
    let id: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let profile_image_path: Option<String> = row.get(2)?;
    let created_str: String = row.get(3)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Identity {
        id: UserId(id),
        display_name,
        profile_image_path,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn upsert_then_get() {
        let db = db();
        let alice = UserId("alice_x_com".into());

        db.upsert_identity(&alice, "Alice", None).unwrap();
        let identity = db.get_identity(&alice).unwrap();
        assert_eq!(identity.display_name, "Alice");
        assert!(identity.profile_image_path.is_none());
    }

    #[test]
    fn upsert_twice_updates_in_place() {
        let db = db();
        let alice = UserId("alice_x_com".into());

        db.upsert_identity(&alice, "Alice", None).unwrap();
        db.upsert_identity(&alice, "Alice B.", Some("images/alice_x_com_profile_picture.png"))
            .unwrap();

        let identity = db.get_identity(&alice).unwrap();
        assert_eq!(identity.display_name, "Alice B.");
        assert_eq!(
            identity.profile_image_path.as_deref(),
            Some("images/alice_x_com_profile_picture.png")
        );
    }

    #[test]
    fn exists_reflects_upsert() {
        let db = db();
        let bob = UserId("bob_x_com".into());

        assert!(!db.identity_exists(&bob).unwrap());
        db.upsert_identity(&bob, "Bob", None).unwrap();
        assert!(db.identity_exists(&bob).unwrap());
    }

    #[test]
    fn get_missing_is_not_found() {
        let db = db();
        let err = db.get_identity(&UserId("ghost".into())).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
