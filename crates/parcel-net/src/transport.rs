//! The blob-transport capability the file system coordinator consumes.
//!
//! Anything that can store, fetch, remove and enumerate opaque blobs in one
//! bound destination can back a drive. [`crate::TransportClient`] is the
//! production implementation.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use parcel_shared::{FilePayload, FileUniqueId, RemoteLocator, StoredFile};

use crate::error::Result;

/// What the transport reports back for a successfully stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    pub locator: RemoteLocator,
    pub file_id: String,
    pub file_unique_id: FileUniqueId,
    pub size: u64,
    pub thumbnail_locator: Option<RemoteLocator>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait BlobTransport: Send + Sync {
    /// Largest payload `send` accepts.
    fn max_upload_size(&self) -> u64;

    /// Store a payload in the bound destination.
    ///
    /// `on_progress` receives a non-decreasing percentage in `0..=100` and
    /// always ends with 100 on success. Cancelling `cancel` aborts the
    /// transfer with [`crate::TransportError::Cancelled`].
    async fn send(
        &self,
        payload: &FilePayload,
        on_progress: &(dyn Fn(u8) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<RemoteRecord>;

    async fn fetch(&self, locator: RemoteLocator) -> Result<Bytes>;

    /// Preview bytes, best effort.
    async fn fetch_thumbnail(&self, locator: RemoteLocator) -> Option<Bytes>;

    /// `Ok(true)` when the record is gone (including already gone),
    /// `Ok(false)` when the transport refused to delete it.
    async fn remove(&self, locator: RemoteLocator) -> Result<bool>;

    /// Records currently present in the destination, newest first, with
    /// default virtual attributes.
    async fn list_existing(&self, limit: usize) -> Result<Vec<StoredFile>>;
}
