//! v001 -- Initial schema creation.
//!
//! Creates the five core tables: `directory`, `conversations`,
//! `user_conversations`, `messages`, and `media_refs`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Directory
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS directory (
    id              TEXT PRIMARY KEY NOT NULL,  -- normalized email id
    display_name    TEXT NOT NULL,
    display_name_lc TEXT NOT NULL,              -- lowercased, drives prefix search
    profile_image   TEXT,                       -- nullable media ref path
    created_at      TEXT NOT NULL,              -- ISO-8601 / RFC-3339
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_directory_name_lc ON directory(display_name_lc);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
-- pair_key is the sorted participant pair joined with '|'.  Its UNIQUE
-- constraint is the compare-and-create primitive: concurrent creates for
-- the same pair converge on one row.
CREATE TABLE IF NOT EXISTS conversations (
    id           TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    pair_key     TEXT NOT NULL UNIQUE,
    user_low     TEXT NOT NULL,
    user_high    TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    last_kind    TEXT,                          -- last-message snapshot
    last_preview TEXT,
    last_sender  TEXT,
    last_sent_at TEXT
);

-- ----------------------------------------------------------------
-- Per-user conversation listing (single-sided delete removes one row)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS user_conversations (
    user_id         TEXT NOT NULL,
    conversation_id TEXT NOT NULL,

    PRIMARY KEY (user_id, conversation_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_user_conversations_user ON user_conversations(user_id);

-- ----------------------------------------------------------------
-- Messages (append-only; seq is the authoritative in-conversation order)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    conversation_id TEXT NOT NULL,              -- FK -> conversations(id)
    id              TEXT NOT NULL,              -- client-derived id
    seq             INTEGER NOT NULL,
    sender          TEXT NOT NULL,
    sent_at         TEXT NOT NULL,              -- ISO-8601
    kind_json       TEXT NOT NULL,              -- serialized MessageKind

    PRIMARY KEY (conversation_id, id),
    UNIQUE (conversation_id, seq),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conv_seq
    ON messages(conversation_id, seq);

-- ----------------------------------------------------------------
-- Media references
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS media_refs (
    path         TEXT PRIMARY KEY NOT NULL,     -- stable reference path
    size_bytes   INTEGER NOT NULL,
    content_type TEXT,
    created_at   TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
