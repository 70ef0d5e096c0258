//! In-memory [`MessagingApi`] used by tests and local demos.
//!
//! Behaves like a single account on the real transport: conversations hold
//! ordered messages, documents carry attributes and optional thumbnails, and
//! uploads report progress chunk by chunk. Failures can be injected per
//! operation, and every call is counted so tests can assert that an action
//! never reached the network.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use parcel_shared::{FileCategory, NumericPeer};

use crate::api::{
    Dialog, DownloadSize, MessagingApi, OutgoingDocument, PeerAddress, ProgressSink, RemoteDocument,
    RemoteMessage,
};
use crate::error::{Result, TransportError};

/// Default progress granularity (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Bytes kept as the preview of image/video documents.
const THUMBNAIL_BYTES: usize = 256;

/// Per-operation call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub authorize: usize,
    pub lookup_entity: usize,
    pub lookup_peer: usize,
    pub dialogs: usize,
    pub send: usize,
    pub download: usize,
    pub delete: usize,
    pub documents: usize,
}

struct StoredMessage {
    message: RemoteMessage,
    data: Bytes,
    thumbnail: Option<Bytes>,
}

struct Inner {
    credential: Vec<u8>,
    revoked: bool,
    me: PeerAddress,
    handles: HashMap<String, NumericPeer>,
    peers: BTreeMap<NumericPeer, (PeerAddress, String)>,
    chats: HashMap<NumericPeer, BTreeMap<i64, StoredMessage>>,
    next_message_id: i64,
    next_document_id: i64,
    failing_deletes: HashSet<i64>,
    fail_send_after_chunks: Option<usize>,
    fail_listings: bool,
    calls: CallCounts,
}

pub struct MemoryMessenger {
    inner: Mutex<Inner>,
    chunk_size: usize,
}

impl MemoryMessenger {
    /// An account whose own user id is `my_id`, accepting `credential`.
    pub fn new(credential: impl Into<Vec<u8>>, my_id: u64) -> Self {
        let me = PeerAddress {
            peer: NumericPeer::User(my_id),
            access_hash: access_hash_for(NumericPeer::User(my_id)),
        };
        Self {
            inner: Mutex::new(Inner {
                credential: credential.into(),
                revoked: false,
                me,
                handles: HashMap::new(),
                peers: BTreeMap::new(),
                chats: HashMap::new(),
                next_message_id: 1,
                next_document_id: 5_000_000,
                failing_deletes: HashSet::new(),
                fail_send_after_chunks: None,
                fail_listings: false,
                calls: CallCounts::default(),
            }),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Make a conversation known to the account, optionally under a handle.
    pub fn add_peer(&self, peer: NumericPeer, title: &str, handle: Option<&str>) -> PeerAddress {
        let address = PeerAddress {
            peer,
            access_hash: access_hash_for(peer),
        };
        let mut inner = self.lock();
        inner.peers.insert(peer, (address, title.to_string()));
        if let Some(handle) = handle {
            inner.handles.insert(handle.to_string(), peer);
        }
        address
    }

    /// Invalidate the credential server-side.
    pub fn revoke_credential(&self) {
        self.lock().revoked = true;
    }

    /// Deleting this message id fails with a transfer error.
    pub fn fail_delete(&self, message_id: i64) {
        self.lock().failing_deletes.insert(message_id);
    }

    /// Uploads break after this many chunks have been sent.
    pub fn fail_sends_after(&self, chunks: usize) {
        self.lock().fail_send_after_chunks = Some(chunks);
    }

    pub fn heal_sends(&self) {
        self.lock().fail_send_after_chunks = None;
    }

    /// Document listings fail with a transfer error while set.
    pub fn fail_listings(&self, fail: bool) {
        self.lock().fail_listings = fail;
    }

    /// Post a document the way another client (or an older version) would,
    /// with an arbitrary caption and attributes. Returns the message id.
    pub fn post_raw(
        &self,
        peer: NumericPeer,
        caption: Option<&str>,
        file_name: Option<&str>,
        mime_type: Option<&str>,
        unique_id: Option<&str>,
        data: impl Into<Bytes>,
    ) -> i64 {
        let data = data.into();
        let mut inner = self.lock();
        let id = inner.next_message_id;
        inner.next_message_id += 1;
        let doc_id = inner.next_document_id;
        inner.next_document_id += 1;

        let thumbnail = thumbnail_for(mime_type.unwrap_or_default(), &data);
        let message = RemoteMessage {
            id,
            date: Utc::now(),
            caption: caption.map(str::to_string),
            document: Some(RemoteDocument {
                id: doc_id,
                unique_id: unique_id.map(str::to_string),
                size: data.len() as u64,
                mime_type: mime_type.map(str::to_string),
                file_name: file_name.map(str::to_string),
                has_thumbnail: thumbnail.is_some(),
            }),
        };
        inner.chats.entry(peer).or_default().insert(
            id,
            StoredMessage {
                message,
                data,
                thumbnail,
            },
        );
        id
    }

    /// Delete a message behind Parcel's back.
    pub fn delete_externally(&self, peer: NumericPeer, message_id: i64) {
        if let Some(chat) = self.lock().chats.get_mut(&peer) {
            chat.remove(&message_id);
        }
    }

    pub fn message_count(&self, peer: NumericPeer) -> usize {
        self.lock().chats.get(&peer).map_or(0, |chat| chat.len())
    }

    pub fn me(&self) -> PeerAddress {
        self.lock().me
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock, count the call and reject a revoked session.
    fn begin(&self, count: impl FnOnce(&mut CallCounts)) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        count(&mut inner.calls);
        if inner.revoked {
            return Err(TransportError::AuthExpired);
        }
        Ok(inner)
    }
}

impl Inner {
    fn knows(&self, address: &PeerAddress) -> bool {
        address.peer == self.me.peer || self.peers.contains_key(&address.peer)
    }
}

#[async_trait]
impl MessagingApi for MemoryMessenger {
    async fn authorize(&self, credential: &[u8]) -> Result<PeerAddress> {
        let inner = self.begin(|c| c.authorize += 1)?;
        if inner.credential != credential {
            return Err(TransportError::AuthExpired);
        }
        Ok(inner.me)
    }

    async fn lookup_entity(&self, handle: &str) -> Result<PeerAddress> {
        let inner = self.begin(|c| c.lookup_entity += 1)?;
        let handle = handle.trim_start_matches('@');
        inner
            .handles
            .get(handle)
            .and_then(|peer| inner.peers.get(peer))
            .map(|(address, _)| *address)
            .ok_or_else(|| TransportError::Resolution(format!("no entity named {handle}")))
    }

    async fn lookup_peer(&self, peer: NumericPeer) -> Result<PeerAddress> {
        let inner = self.begin(|c| c.lookup_peer += 1)?;
        if peer == inner.me.peer {
            return Ok(inner.me);
        }
        inner
            .peers
            .get(&peer)
            .map(|(address, _)| *address)
            .ok_or_else(|| TransportError::Resolution(format!("unknown peer {peer:?}")))
    }

    async fn dialogs(&self, limit: usize) -> Result<Vec<Dialog>> {
        let inner = self.begin(|c| c.dialogs += 1)?;
        Ok(inner
            .peers
            .values()
            .take(limit)
            .map(|(address, title)| Dialog {
                address: *address,
                title: title.clone(),
            })
            .collect())
    }

    async fn send_document(
        &self,
        to: &PeerAddress,
        document: OutgoingDocument,
        progress: ProgressSink<'_>,
    ) -> Result<RemoteMessage> {
        let fail_after = {
            let inner = self.begin(|c| c.send += 1)?;
            if !inner.knows(to) {
                return Err(TransportError::Resolution(format!("unknown peer {:?}", to.peer)));
            }
            inner.fail_send_after_chunks
        };

        let total = document.data.len() as u64;
        let mut sent = 0u64;
        let mut chunks = 0usize;
        if let ControlFlow::Break(()) = progress(0, total) {
            return Err(TransportError::Cancelled);
        }
        for chunk in document.data.chunks(self.chunk_size) {
            if fail_after.is_some_and(|n| chunks >= n) {
                return Err(TransportError::Transfer("connection reset by peer".into()));
            }
            tokio::task::yield_now().await;
            sent += chunk.len() as u64;
            chunks += 1;
            if let ControlFlow::Break(()) = progress(sent, total) {
                return Err(TransportError::Cancelled);
            }
        }

        let mut inner = self.lock();
        let id = inner.next_message_id;
        inner.next_message_id += 1;
        let doc_id = inner.next_document_id;
        inner.next_document_id += 1;

        let thumbnail = thumbnail_for(&document.mime_type, &document.data);
        let message = RemoteMessage {
            id,
            date: Utc::now(),
            caption: Some(document.caption),
            document: Some(RemoteDocument {
                id: doc_id,
                unique_id: Some(format!("AgAD{doc_id:x}")),
                size: total,
                mime_type: Some(document.mime_type),
                file_name: Some(document.file_name),
                has_thumbnail: thumbnail.is_some(),
            }),
        };
        inner.chats.entry(to.peer).or_default().insert(
            id,
            StoredMessage {
                message: message.clone(),
                data: document.data,
                thumbnail,
            },
        );
        Ok(message)
    }

    async fn download(
        &self,
        from: &PeerAddress,
        message_id: i64,
        size: DownloadSize,
    ) -> Result<Option<Bytes>> {
        let inner = self.begin(|c| c.download += 1)?;
        let stored = inner
            .chats
            .get(&from.peer)
            .and_then(|chat| chat.get(&message_id));
        Ok(stored.and_then(|s| match size {
            DownloadSize::Full => Some(s.data.clone()),
            DownloadSize::Thumbnail => s.thumbnail.clone(),
        }))
    }

    async fn delete_messages(&self, from: &PeerAddress, ids: &[i64]) -> Result<usize> {
        let mut inner = self.begin(|c| c.delete += 1)?;
        if let Some(id) = ids.iter().find(|id| inner.failing_deletes.contains(*id)) {
            return Err(TransportError::Transfer(format!(
                "MESSAGE_DELETE_FORBIDDEN for message {id}"
            )));
        }
        let Some(chat) = inner.chats.get_mut(&from.peer) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| chat.remove(*id).is_some()).count())
    }

    async fn documents(&self, from: &PeerAddress, limit: usize) -> Result<Vec<RemoteMessage>> {
        let inner = self.begin(|c| c.documents += 1)?;
        if inner.fail_listings {
            return Err(TransportError::Transfer("FLOOD_WAIT_30".into()));
        }
        let Some(chat) = inner.chats.get(&from.peer) else {
            return Ok(Vec::new());
        };
        Ok(chat
            .values()
            .rev()
            .filter(|s| s.message.document.is_some())
            .take(limit)
            .map(|s| s.message.clone())
            .collect())
    }
}

fn access_hash_for(peer: NumericPeer) -> i64 {
    let raw = peer.raw_id() as i64;
    match peer {
        NumericPeer::User(_) => raw.wrapping_mul(31),
        NumericPeer::Group(_) => 0,
        NumericPeer::Channel(_) => raw.wrapping_mul(37),
    }
}

fn thumbnail_for(mime_type: &str, data: &Bytes) -> Option<Bytes> {
    if FileCategory::from_mime(mime_type).has_preview() && !data.is_empty() {
        Some(data.slice(..data.len().min(THUMBNAIL_BYTES)))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, mime: &str, data: &'static [u8]) -> OutgoingDocument {
        OutgoingDocument {
            file_name: name.into(),
            mime_type: mime.into(),
            caption: String::new(),
            data: Bytes::from_static(data),
        }
    }

    #[tokio::test]
    async fn test_authorize() {
        let api = MemoryMessenger::new(b"good".to_vec(), 1);
        assert_eq!(api.authorize(b"good").await.unwrap().peer, NumericPeer::User(1));
        assert_eq!(api.authorize(b"bad").await, Err(TransportError::AuthExpired));

        api.revoke_credential();
        assert_eq!(api.authorize(b"good").await, Err(TransportError::AuthExpired));
    }

    #[tokio::test]
    async fn test_send_reports_chunks_and_thumbnails() {
        let api = MemoryMessenger::new(b"c".to_vec(), 1).with_chunk_size(4);
        let me = api.me();

        let mut seen = Vec::new();
        let mut sink = |sent: u64, total: u64| {
            seen.push((sent, total));
            ControlFlow::Continue(())
        };
        let msg = api
            .send_document(&me, doc("a.png", "image/png", b"0123456789"), &mut sink)
            .await
            .unwrap();
        assert_eq!(seen, vec![(0, 10), (4, 10), (8, 10), (10, 10)]);

        let document = msg.document.unwrap();
        assert!(document.has_thumbnail);
        assert_eq!(document.size, 10);
        let thumb = api
            .download(&me, msg.id, DownloadSize::Thumbnail)
            .await
            .unwrap();
        assert_eq!(thumb.as_deref(), Some(&b"0123456789"[..]));
    }

    #[tokio::test]
    async fn test_send_break_cancels() {
        let api = MemoryMessenger::new(b"c".to_vec(), 1).with_chunk_size(2);
        let me = api.me();
        let mut sink = |sent: u64, _total: u64| {
            if sent >= 4 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };
        let err = api
            .send_document(&me, doc("a.txt", "text/plain", b"abcdefgh"), &mut sink)
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Cancelled);
        assert_eq!(api.message_count(me.peer), 0);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let api = MemoryMessenger::new(b"c".to_vec(), 1).with_chunk_size(2);
        let me = api.me();
        api.fail_sends_after(1);
        let mut sink = |_: u64, _: u64| ControlFlow::Continue(());
        let err = api
            .send_document(&me, doc("a.txt", "text/plain", b"abcdef"), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Transfer(_)));

        let id = api.post_raw(me.peer, None, Some("x.bin"), None, None, &b"xyz"[..]);
        api.fail_delete(id);
        assert!(api.delete_messages(&me, &[id]).await.is_err());
        assert_eq!(api.message_count(me.peer), 1);
    }

    #[tokio::test]
    async fn test_documents_newest_first() {
        let api = MemoryMessenger::new(b"c".to_vec(), 1);
        let me = api.me();
        let a = api.post_raw(me.peer, None, Some("a"), None, None, &b"a"[..]);
        let b = api.post_raw(me.peer, None, Some("b"), None, None, &b"b"[..]);

        let docs = api.documents(&me, 10).await.unwrap();
        assert_eq!(docs.iter().map(|m| m.id).collect::<Vec<_>>(), vec![b, a]);
        assert_eq!(api.documents(&me, 1).await.unwrap().len(), 1);
        assert_eq!(api.calls().documents, 2);
    }
}
