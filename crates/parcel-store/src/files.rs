//! CRUD operations for [`StoredFile`] records.
//!
//! Every operation is keyed by `file_unique_id`, never by the transport
//! locator, so virtual attributes survive a locator change.

use chrono::{DateTime, Utc};
use parcel_shared::{FileUniqueId, RemoteLocator, StoredFile};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{FileFilter, FileState, FolderScope};

const FILE_COLUMNS: &str = "file_unique_id, file_id, size, name, mime_type, created_at,
     remote_locator, thumbnail_locator, folder_path, is_favorite, is_deleted, deleted_at";

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert a record or overwrite the one with the same unique id.
    ///
    /// Records that break the model invariants (a live file without a remote
    /// locator, most importantly) are refused.
    pub fn upsert(&self, file: &StoredFile) -> Result<()> {
        file.validate()?;

        self.conn().execute(
            "INSERT INTO files (file_unique_id, file_id, size, name, mime_type, created_at,
                                remote_locator, thumbnail_locator, folder_path,
                                is_favorite, is_deleted, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(file_unique_id) DO UPDATE SET
                file_id = excluded.file_id,
                size = excluded.size,
                name = excluded.name,
                mime_type = excluded.mime_type,
                created_at = excluded.created_at,
                remote_locator = excluded.remote_locator,
                thumbnail_locator = excluded.thumbnail_locator,
                folder_path = excluded.folder_path,
                is_favorite = excluded.is_favorite,
                is_deleted = excluded.is_deleted,
                deleted_at = excluded.deleted_at",
            params![
                file.file_unique_id.as_str(),
                file.file_id,
                file.size as i64,
                file.name,
                file.mime_type,
                file.created_at.to_rfc3339(),
                file.remote_locator.map(|l| l.0),
                file.thumbnail_locator.map(|l| l.0),
                file.folder_path,
                file.is_favorite as i32,
                file.is_deleted as i32,
                file.deleted_at.map(|d| d.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Move a file into a virtual folder (`None` = root). The folder must
    /// exist.
    pub fn set_folder(&self, id: &FileUniqueId, path: Option<&str>) -> Result<()> {
        if let Some(path) = path {
            if self.get_folder_by_path(path)?.is_none() {
                return Err(StoreError::FolderNotFound(path.to_string()));
            }
        }

        let affected = self.conn().execute(
            "UPDATE files SET folder_path = ?2 WHERE file_unique_id = ?1",
            params![id.as_str(), path],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Flip the favorite flag and return the new value.
    pub fn toggle_favorite(&self, id: &FileUniqueId) -> Result<bool> {
        let flag: Option<i32> = self
            .conn()
            .query_row(
                "UPDATE files SET is_favorite = 1 - is_favorite
                 WHERE file_unique_id = ?1
                 RETURNING is_favorite",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        flag.map(|f| f != 0).ok_or(StoreError::NotFound)
    }

    /// Move a file to the trash. Trashing twice keeps the first timestamp.
    pub fn soft_delete(&self, id: &FileUniqueId) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE files SET is_deleted = 1, deleted_at = COALESCE(deleted_at, ?2)
             WHERE file_unique_id = ?1",
            params![id.as_str(), Utc::now().to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Take a file out of the trash.
    pub fn restore(&self, id: &FileUniqueId) -> Result<()> {
        let mut file = self.get_file(id)?;
        file.is_deleted = false;
        file.deleted_at = None;
        // a trashed record that never reached the transport cannot come back
        file.validate()?;

        self.conn().execute(
            "UPDATE files SET is_deleted = 0, deleted_at = NULL WHERE file_unique_id = ?1",
            params![id.as_str()],
        )?;
        Ok(())
    }

    /// Remove the record entirely. Returns `true` if a row was deleted.
    pub fn purge(&self, id: &FileUniqueId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM files WHERE file_unique_id = ?1",
            params![id.as_str()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_file(&self, id: &FileUniqueId) -> Result<StoredFile> {
        self.conn()
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE file_unique_id = ?1"),
                params![id.as_str()],
                row_to_file,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List records matching `filter`, newest first.
    pub fn get_all(&self, filter: &FileFilter) -> Result<Vec<StoredFile>> {
        let mut sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE 1 = 1");
        let mut values: Vec<Value> = Vec::new();

        match filter.state {
            FileState::Live => sql.push_str(" AND is_deleted = 0"),
            FileState::Trashed => sql.push_str(" AND is_deleted = 1"),
            FileState::Any => {}
        }

        match &filter.folder {
            FolderScope::Any => {}
            FolderScope::Root => sql.push_str(" AND folder_path IS NULL"),
            FolderScope::Path(path) => {
                values.push(Value::Text(path.clone()));
                sql.push_str(&format!(" AND folder_path = ?{}", values.len()));
            }
        }

        if filter.favorites_only {
            sql.push_str(" AND is_favorite = 1");
        }

        sql.push_str(" ORDER BY created_at DESC, file_unique_id ASC");

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_file)?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn conversion_error<E>(column: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_timestamp(column: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

/// Map a `rusqlite::Row` to a [`StoredFile`].
fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredFile> {
    let file_unique_id: String = row.get(0)?;
    let file_id: String = row.get(1)?;
    let size: i64 = row.get(2)?;
    let name: String = row.get(3)?;
    let mime_type: String = row.get(4)?;
    let created_str: String = row.get(5)?;
    let remote_locator: Option<i64> = row.get(6)?;
    let thumbnail_locator: Option<i64> = row.get(7)?;
    let folder_path: Option<String> = row.get(8)?;
    let is_favorite: i32 = row.get(9)?;
    let is_deleted: i32 = row.get(10)?;
    let deleted_str: Option<String> = row.get(11)?;

    let size = u64::try_from(size).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Integer, Box::new(e))
    })?;
    let created_at = parse_timestamp(5, &created_str)?;
    let deleted_at = deleted_str
        .as_deref()
        .map(|s| parse_timestamp(11, s))
        .transpose()?;

    Ok(StoredFile {
        file_id,
        file_unique_id: FileUniqueId::new(file_unique_id),
        size,
        name,
        mime_type,
        created_at,
        remote_locator: remote_locator.map(RemoteLocator),
        thumbnail_locator: thumbnail_locator.map(RemoteLocator),
        folder_path,
        is_favorite: is_favorite != 0,
        is_deleted: is_deleted != 0,
        deleted_at,
    })
}
