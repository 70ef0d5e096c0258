//! Parcel client core: the virtual file system coordinator that turns one
//! messaging conversation into a drive with folders, favorites and a trash
//! can.
//!
//! A [`Drive`] is built per login over any [`parcel_net::BlobTransport`]
//! (in production a [`parcel_net::TransportClient`]) and a local
//! [`parcel_store::Database`]. Account state lives in [`auth::Account`].

pub mod auth;
pub mod config;
pub mod drive;
pub mod error;
pub mod events;
pub mod reconcile;
pub mod view;

pub use auth::{Account, AuthState};
pub use config::DriveConfig;
pub use drive::{BatchReport, Drive, UploadEntry, UploadState};
pub use error::{DriveError, Result};
pub use events::DriveEvent;
pub use view::{SortDirection, SortKey, TypeFilter, ViewOptions, ViewScope};
