//! On-disk session persistence.
//!
//! The session (transport credential + bound destination) is written as a
//! small JSON file next to the index, not inside it. Signing out deletes
//! this file and leaves every folder, favorite and trash flag untouched.

use std::path::{Path, PathBuf};

use parcel_shared::Session;

use crate::database::default_data_dir;
use crate::error::{Result, StoreError};

/// File name of the session inside the data directory.
pub const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Session file in the default application data directory.
    pub fn new() -> Result<Self> {
        Ok(Self::in_dir(&default_data_dir()?))
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the session, replacing any previous one.
    ///
    /// Written to a sibling temp file first and renamed into place so a crash
    /// never leaves a truncated credential behind.
    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec_pretty(session)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::info!(path = %self.path.display(), "session saved");
        Ok(())
    }

    /// Load the stored session. [`StoreError::NotFound`] when none exists;
    /// a corrupt file surfaces as [`StoreError::Json`].
    pub fn load(&self) -> Result<Session> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Forget the stored session. Missing files are not an error.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "session cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
