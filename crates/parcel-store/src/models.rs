//! Index-only models and query filters.
//!
//! [`parcel_shared::StoredFile`] is defined in the shared crate because the
//! transport reconstructs it too; folders exist nowhere but here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// VirtualFolder
// ---------------------------------------------------------------------------

/// A folder in the virtual tree. Never sent to the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualFolder {
    pub id: Uuid,
    pub name: String,
    /// `None` for folders directly under the root.
    pub parent_id: Option<Uuid>,
    /// Derived from the parent path and the name, e.g. `/Photos/2024`.
    pub path: String,
    pub created_at: DateTime<Utc>,
}

impl VirtualFolder {
    /// Path of the folder containing this one (`None` = root).
    pub fn parent_path(&self) -> Option<&str> {
        parent_of(&self.path)
    }
}

/// Parent of a folder path; `None` when the parent is the root.
pub fn parent_of(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", _)) | None => None,
        Some((parent, _)) => Some(parent),
    }
}

/// Join a child name onto a parent path (`None` = root).
pub fn join_path(parent: Option<&str>, name: &str) -> String {
    format!("{}/{}", parent.unwrap_or(""), name)
}

// ---------------------------------------------------------------------------
// File filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileState {
    /// Not in the trash.
    #[default]
    Live,
    /// Soft-deleted, waiting for the trash to be emptied.
    Trashed,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FolderScope {
    #[default]
    Any,
    Root,
    /// Exactly this folder, not its descendants.
    Path(String),
}

/// Selection passed to [`crate::Database::get_all`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileFilter {
    pub state: FileState,
    pub folder: FolderScope,
    pub favorites_only: bool,
}

impl FileFilter {
    pub fn live() -> Self {
        Self::default()
    }

    pub fn trashed() -> Self {
        Self {
            state: FileState::Trashed,
            ..Self::default()
        }
    }

    pub fn all() -> Self {
        Self {
            state: FileState::Any,
            ..Self::default()
        }
    }

    pub fn in_folder(mut self, path: Option<&str>) -> Self {
        self.folder = match path {
            Some(p) => FolderScope::Path(p.to_string()),
            None => FolderScope::Root,
        };
        self
    }

    pub fn favorites(mut self) -> Self {
        self.favorites_only = true;
        self
    }
}
