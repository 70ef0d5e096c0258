//! v001 -- Initial schema: the `files` table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Files: transport existence fields + local virtual attributes
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS files (
    file_unique_id    TEXT PRIMARY KEY NOT NULL,
    file_id           TEXT NOT NULL,
    size              INTEGER NOT NULL,
    name              TEXT NOT NULL,
    mime_type         TEXT NOT NULL,
    created_at        TEXT NOT NULL,             -- RFC-3339
    remote_locator    INTEGER,                   -- message sequence number
    thumbnail_locator INTEGER,
    folder_path       TEXT,                      -- NULL = root
    is_favorite       INTEGER NOT NULL DEFAULT 0,
    is_deleted        INTEGER NOT NULL DEFAULT 0,
    deleted_at        TEXT
);

CREATE INDEX IF NOT EXISTS idx_files_folder ON files(folder_path);
CREATE INDEX IF NOT EXISTS idx_files_deleted ON files(is_deleted);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
