//! Boundary to the external messaging client library.
//!
//! Parcel does not speak the transport's wire protocol (encryption, framing,
//! flood-control back-off). It drives whatever library does through this
//! trait. [`crate::MemoryMessenger`] implements it in memory for tests.

use std::ops::ControlFlow;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use parcel_shared::NumericPeer;

use crate::error::Result;

/// A resolved, transport-specific address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub peer: NumericPeer,
    /// Proof of access the transport hands out with every resolved entity.
    pub access_hash: i64,
}

/// A conversation the user could pick as storage destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialog {
    pub address: PeerAddress,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct OutgoingDocument {
    pub file_name: String,
    pub mime_type: String,
    pub caption: String,
    pub data: Bytes,
}

/// Document attributes as the transport reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDocument {
    pub id: i64,
    /// Transport's stable document id, when it exposes one.
    pub unique_id: Option<String>,
    pub size: u64,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub has_thumbnail: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    /// Sequence number inside the conversation.
    pub id: i64,
    pub date: DateTime<Utc>,
    pub caption: Option<String>,
    pub document: Option<RemoteDocument>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadSize {
    Full,
    Thumbnail,
}

/// Upload progress sink: `(bytes_sent, bytes_total)`. Returning
/// `ControlFlow::Break` aborts the transfer with
/// [`crate::TransportError::Cancelled`].
pub type ProgressSink<'a> = &'a mut (dyn FnMut(u64, u64) -> ControlFlow<()> + Send);

#[async_trait]
pub trait MessagingApi: Send + Sync {
    /// Log in with a stored credential and return the user's own address.
    async fn authorize(&self, credential: &[u8]) -> Result<PeerAddress>;

    /// Native entity lookup (handles, invite names, raw ids the library knows).
    async fn lookup_entity(&self, handle: &str) -> Result<PeerAddress>;

    /// Lookup by bare numeric id.
    async fn lookup_peer(&self, peer: NumericPeer) -> Result<PeerAddress>;

    async fn dialogs(&self, limit: usize) -> Result<Vec<Dialog>>;

    async fn send_document(
        &self,
        to: &PeerAddress,
        document: OutgoingDocument,
        progress: ProgressSink<'_>,
    ) -> Result<RemoteMessage>;

    /// `Ok(None)` when the message (or its thumbnail) does not exist.
    async fn download(
        &self,
        from: &PeerAddress,
        message_id: i64,
        size: DownloadSize,
    ) -> Result<Option<Bytes>>;

    /// Returns how many of `ids` were actually deleted.
    async fn delete_messages(&self, from: &PeerAddress, ids: &[i64]) -> Result<usize>;

    /// Messages carrying a document, newest first.
    async fn documents(&self, from: &PeerAddress, limit: usize) -> Result<Vec<RemoteMessage>>;
}
