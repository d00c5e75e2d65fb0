//! Prefix search over directory display names.
//!
//! The index is the lowercased `display_name_lc` column maintained by the
//! directory upsert, so the search view is at most one upsert behind.

use rusqlite::params;

use parley_shared::UserId;

use crate::database::Database;
use crate::error::Result;
use crate::models::DirectoryEntry;

/// Escape SQL LIKE wildcards so the term is matched literally.
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl Database {
    /// Case-insensitive prefix search over display names.
    ///
    /// The requesting identity is always excluded.  A blank term yields an
    /// empty result, never the whole directory.
    pub fn search_by_name_prefix(
        &self,
        term: &str,
        excluding: &UserId,
    ) -> Result<Vec<DirectoryEntry>> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        let pattern = format!("{}%", escape_like(&term.to_lowercase()));
        let mut stmt = self.conn().prepare(
            "SELECT id, display_name
             FROM directory
             WHERE display_name_lc LIKE ?1 ESCAPE '\\'
               AND id != ?2
             ORDER BY display_name_lc ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![pattern, excluding.as_str()], |row| {
            let id: String = row.get(0)?;
            let display_name: String = row.get(1)?;
            Ok(DirectoryEntry {
                id: UserId(id),
                display_name,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_identity(&UserId("alice_x_com".into()), "Alice", None)
            .unwrap();
        db.upsert_identity(&UserId("albert_x_com".into()), "albert", None)
            .unwrap();
        db.upsert_identity(&UserId("bob_x_com".into()), "Bob", None)
            .unwrap();
        db
    }

    #[test]
    fn blank_term_yields_empty() {
        let db = db();
        let me = UserId("bob_x_com".into());
        assert!(db.search_by_name_prefix("", &me).unwrap().is_empty());
        assert!(db.search_by_name_prefix("   ", &me).unwrap().is_empty());
    }

    #[test]
    fn prefix_match_is_case_insensitive() {
        let db = db();
        let me = UserId("bob_x_com".into());

        let hits = db.search_by_name_prefix("AL", &me).unwrap();
        let names: Vec<_> = hits.iter().map(|e| e.display_name.as_str()).collect();
        assert_eq!(names, vec!["albert", "Alice"]);
    }

    #[test]
    fn requester_excluded_even_when_matching() {
        let db = db();
        let alice = UserId("alice_x_com".into());

        let hits = db.search_by_name_prefix("al", &alice).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, UserId("albert_x_com".into()));
    }

    #[test]
    fn wildcards_are_literal() {
        let db = db();
        db.upsert_identity(&UserId("percent".into()), "100% Real", None)
            .unwrap();
        let me = UserId("bob_x_com".into());

        // "%" must not match everything.
        let hits = db.search_by_name_prefix("%", &me).unwrap();
        assert!(hits.is_empty());

        let hits = db.search_by_name_prefix("100%", &me).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn rename_updates_the_index() {
        let db = db();
        let me = UserId("alice_x_com".into());

        db.upsert_identity(&UserId("bob_x_com".into()), "Robert", None)
            .unwrap();
        assert!(db.search_by_name_prefix("bo", &me).unwrap().is_empty());
        assert_eq!(db.search_by_name_prefix("rob", &me).unwrap().len(), 1);
    }
}
