//! The unit of storage.
//!
//! A [`StoredFile`] mixes two kinds of attributes: existence fields that come
//! from the transport (`file_id`, `size`, `remote_locator`, ...) and virtual
//! attributes that only ever live in the local index (`folder_path`,
//! `is_favorite`, `is_deleted`, `deleted_at`).

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvariantViolation;
use crate::mime::{guess_from_name, FileCategory};
use crate::types::{FileUniqueId, RemoteLocator, UploadId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    /// Transport document id, or the upload id while pending.
    pub file_id: String,
    /// Stable local key.
    pub file_unique_id: FileUniqueId,
    pub size: u64,
    pub name: String,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    /// Where the blob lives on the transport. `None` while pending.
    pub remote_locator: Option<RemoteLocator>,
    pub thumbnail_locator: Option<RemoteLocator>,
    /// Virtual folder; `None` is the root.
    pub folder_path: Option<String>,
    pub is_favorite: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StoredFile {
    /// A record for an upload that has not reached the transport.
    pub fn pending(upload_id: UploadId, payload: &FilePayload, folder_path: Option<String>) -> Self {
        Self {
            file_id: upload_id.to_string(),
            file_unique_id: FileUniqueId::pending(&upload_id),
            size: payload.size(),
            name: payload.name.clone(),
            mime_type: payload.mime_type.clone(),
            created_at: Utc::now(),
            remote_locator: None,
            thumbnail_locator: None,
            folder_path,
            is_favorite: false,
            is_deleted: false,
            deleted_at: None,
        }
    }

    pub fn category(&self) -> FileCategory {
        FileCategory::from_mime(&self.mime_type)
    }

    /// Live means landed on the transport and not in the trash.
    pub fn is_live(&self) -> bool {
        !self.is_deleted && self.remote_locator.is_some()
    }

    /// Check the model invariants before the record is persisted or published.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        if !self.is_deleted && self.remote_locator.is_none() {
            return Err(InvariantViolation::LiveWithoutLocator(
                self.file_unique_id.to_string(),
            ));
        }
        if !self.is_deleted && self.deleted_at.is_some() {
            return Err(InvariantViolation::DeletedAtWithoutTrash(
                self.file_unique_id.to_string(),
            ));
        }
        if let Some(path) = &self.folder_path {
            if !is_valid_folder_path(path) {
                return Err(InvariantViolation::FolderPath(path.clone()));
            }
        }
        Ok(())
    }
}

/// Folder paths are absolute (`/a/b`), with no empty segments and no
/// trailing slash. The root is represented by `None`, never by `/`.
pub fn is_valid_folder_path(path: &str) -> bool {
    match path.strip_prefix('/') {
        Some(rest) => !rest.is_empty() && rest.split('/').all(|seg| !seg.trim().is_empty()),
        None => false,
    }
}

/// Blob handed to an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl FilePayload {
    /// Build a payload, guessing the mime type from the name.
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let mime_type = guess_from_name(&name).to_string();
        Self {
            name,
            mime_type,
            data: data.into(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_file() -> StoredFile {
        StoredFile {
            file_id: "10".into(),
            file_unique_id: FileUniqueId::new("u10"),
            size: 3,
            name: "a.txt".into(),
            mime_type: "text/plain".into(),
            created_at: Utc::now(),
            remote_locator: Some(RemoteLocator(10)),
            thumbnail_locator: None,
            folder_path: None,
            is_favorite: false,
            is_deleted: false,
            deleted_at: None,
        }
    }

    #[test]
    fn test_live_file_is_valid() {
        assert!(live_file().validate().is_ok());
        assert!(live_file().is_live());
    }

    #[test]
    fn test_live_without_locator_is_rejected() {
        let mut file = live_file();
        file.remote_locator = None;
        assert_eq!(
            file.validate(),
            Err(InvariantViolation::LiveWithoutLocator("u10".into()))
        );
        assert!(!file.is_live());
    }

    #[test]
    fn test_pending_record_is_not_live() {
        let payload = FilePayload::new("photo.png", vec![1u8, 2, 3]);
        let file = StoredFile::pending(UploadId::new(), &payload, Some("/Pics".into()));
        assert_eq!(file.mime_type, "image/png");
        assert_eq!(file.size, 3);
        assert!(file.file_unique_id.as_str().starts_with("pending-"));
        assert!(file.validate().is_err());
    }

    #[test]
    fn test_trashed_record_needs_no_locator() {
        let mut file = live_file();
        file.remote_locator = None;
        file.is_deleted = true;
        file.deleted_at = Some(Utc::now());
        assert!(file.validate().is_ok());
    }

    #[test]
    fn test_folder_paths() {
        assert!(is_valid_folder_path("/a"));
        assert!(is_valid_folder_path("/a/b c"));
        assert!(!is_valid_folder_path("/"));
        assert!(!is_valid_folder_path("a/b"));
        assert!(!is_valid_folder_path("/a//b"));
        assert!(!is_valid_folder_path("/a/"));

        let mut file = live_file();
        file.folder_path = Some("docs".into());
        assert!(matches!(file.validate(), Err(InvariantViolation::FolderPath(_))));
    }
}
