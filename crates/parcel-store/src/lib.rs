//! # parcel-store
//!
//! Local metadata index for Parcel, backed by SQLite.
//!
//! The transport only knows that a blob exists. Everything a user layers on
//! top of it (folders, favorites, the trash) lives here, keyed by the stable
//! `file_unique_id`. The crate also owns the on-disk session file, which is
//! kept apart from the index so signing out never touches file metadata.

pub mod database;
pub mod files;
pub mod folders;
pub mod migrations;
pub mod models;
pub mod session;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use session::SessionStore;
