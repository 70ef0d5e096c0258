//! CRUD operations for [`VirtualFolder`] records.
//!
//! Folder paths are denormalised onto files (`files.folder_path`), so any
//! operation that changes a path rewrites the whole subtree, folders and
//! files alike, inside one transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{join_path, parent_of, VirtualFolder};

/// Matches a folder path and everything below it. `?1` is the path.
const SUBTREE: &str = "(path = ?1 OR substr(path, 1, length(?1) + 1) = ?1 || '/')";
const FILE_SUBTREE: &str =
    "(folder_path = ?1 OR substr(folder_path, 1, length(?1) + 1) = ?1 || '/')";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a folder under `parent` (`None` = root).
    pub fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<VirtualFolder> {
        let name = validate_name(name)?;

        let parent_id = match parent {
            Some(p) => Some(
                self.get_folder_by_path(p)?
                    .ok_or_else(|| StoreError::FolderNotFound(p.to_string()))?
                    .id,
            ),
            None => None,
        };

        let path = join_path(parent, &name);
        if self.get_folder_by_path(&path)?.is_some() {
            return Err(StoreError::FolderExists(path));
        }

        let folder = VirtualFolder {
            id: Uuid::new_v4(),
            name,
            parent_id,
            path,
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO folders (id, name, parent_id, path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                folder.id.to_string(),
                folder.name,
                folder.parent_id.map(|p| p.to_string()),
                folder.path,
                folder.created_at.to_rfc3339(),
            ],
        )?;

        tracing::debug!(path = %folder.path, "created folder");
        Ok(folder)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// List every folder ordered by path, so parents precede children.
    pub fn list_folders(&self) -> Result<Vec<VirtualFolder>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, parent_id, path, created_at
             FROM folders
             ORDER BY path ASC",
        )?;
        let rows = stmt.query_map([], row_to_folder)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn get_folder_by_path(&self, path: &str) -> Result<Option<VirtualFolder>> {
        let folder = self
            .conn()
            .query_row(
                "SELECT id, name, parent_id, path, created_at FROM folders WHERE path = ?1",
                params![path],
                row_to_folder,
            )
            .optional()?;
        Ok(folder)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Rename a folder in place, rewriting the paths of its descendants and
    /// of every file stored below it.
    pub fn rename_folder(&self, path: &str, new_name: &str) -> Result<VirtualFolder> {
        let new_name = validate_name(new_name)?;
        if self.get_folder_by_path(path)?.is_none() {
            return Err(StoreError::FolderNotFound(path.to_string()));
        }

        let new_path = join_path(parent_of(path), &new_name);
        if new_path == path {
            return self
                .get_folder_by_path(path)?
                .ok_or_else(|| StoreError::FolderNotFound(path.to_string()));
        }
        if self.get_folder_by_path(&new_path)?.is_some() {
            return Err(StoreError::FolderExists(new_path));
        }

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            &format!("UPDATE folders SET path = ?2 || substr(path, length(?1) + 1) WHERE {SUBTREE}"),
            params![path, new_path],
        )?;
        tx.execute(
            "UPDATE folders SET name = ?2 WHERE path = ?1",
            params![new_path, new_name],
        )?;
        let files = tx.execute(
            &format!(
                "UPDATE files SET folder_path = ?2 || substr(folder_path, length(?1) + 1)
                 WHERE {FILE_SUBTREE}"
            ),
            params![path, new_path],
        )?;
        tx.commit()?;

        tracing::info!(from = %path, to = %new_path, files, "renamed folder");

        self.get_folder_by_path(&new_path)?
            .ok_or(StoreError::FolderNotFound(new_path))
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a folder and its subfolders. Files stored anywhere below it are
    /// moved up to the deleted folder's parent; nothing is trashed. Returns
    /// the number of files moved.
    pub fn delete_folder(&self, path: &str) -> Result<usize> {
        if self.get_folder_by_path(path)?.is_none() {
            return Err(StoreError::FolderNotFound(path.to_string()));
        }
        let parent = parent_of(path);

        let tx = self.conn().unchecked_transaction()?;
        let moved = tx.execute(
            &format!("UPDATE files SET folder_path = ?2 WHERE {FILE_SUBTREE}"),
            params![path, parent],
        )?;
        // ON DELETE CASCADE takes the subfolders too
        tx.execute("DELETE FROM folders WHERE path = ?1", params![path])?;
        tx.commit()?;

        tracing::info!(path = %path, moved, "deleted folder");
        Ok(moved)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.contains('/') || trimmed == "." || trimmed == ".." {
        return Err(StoreError::InvalidFolderName(name.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Map a `rusqlite::Row` to a [`VirtualFolder`].
fn row_to_folder(row: &rusqlite::Row<'_>) -> rusqlite::Result<VirtualFolder> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let parent_str: Option<String> = row.get(2)?;
    let path: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    let id = Uuid::parse_str(&id_str)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;

    let parent_id = parent_str
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e)))?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(VirtualFolder {
        id,
        name,
        parent_id,
        path,
        created_at,
    })
}
