use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parcel_shared::constants::MAX_UPLOAD_SIZE;
use parcel_shared::{
    Caption, DestinationId, FilePayload, FileUniqueId, RemoteLocator, Session, StorageDestination,
    StoredFile,
};

use crate::api::{DownloadSize, MessagingApi, OutgoingDocument, PeerAddress};
use crate::error::{Result, TransportError};
use crate::records::stored_file_from_message;
use crate::resolver::AddressResolver;
use crate::transport::{BlobTransport, RemoteRecord};

/// Façade over the messaging library for one logged-in session.
///
/// Built per login from an explicit [`Session`]. Once the transport rejects
/// the credential the client latches into a signed-out state and refuses
/// every further call without touching the network.
pub struct TransportClient {
    api: Arc<dyn MessagingApi>,
    resolver: AddressResolver,
    session: RwLock<Session>,
    signed_out: AtomicBool,
    max_upload_size: u64,
}

impl TransportClient {
    /// Authorise the session's credential against the transport.
    pub async fn connect(api: Arc<dyn MessagingApi>, session: Session) -> Result<Self> {
        let me = api.authorize(session.credential()).await?;
        info!(peer = ?me.peer, "transport session authorised");

        Ok(Self {
            resolver: AddressResolver::new(api.clone(), me),
            api,
            session: RwLock::new(session),
            signed_out: AtomicBool::new(false),
            max_upload_size: MAX_UPLOAD_SIZE,
        })
    }

    pub fn with_max_upload_size(mut self, max_upload_size: u64) -> Self {
        self.max_upload_size = max_upload_size;
        self
    }

    pub fn session(&self) -> Session {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn destination(&self) -> Option<StorageDestination> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .destination
            .clone()
    }

    pub fn is_signed_out(&self) -> bool {
        self.signed_out.load(Ordering::SeqCst)
    }

    pub fn resolver(&self) -> &AddressResolver {
        &self.resolver
    }

    /// Candidate storage destinations, the user's own notes chat first.
    pub async fn list_destinations(&self, limit: usize) -> Result<Vec<StorageDestination>> {
        self.ensure_signed_in()?;
        let dialogs = self.check(self.api.dialogs(limit).await)?;
        let me = self.resolver.self_address();

        let mut out = vec![StorageDestination::self_notes()];
        for dialog in dialogs {
            if dialog.address.peer == me.peer {
                continue;
            }
            let id = DestinationId::for_peer(dialog.address.peer);
            self.resolver.seed(id.clone(), dialog.address);
            out.push(StorageDestination {
                id,
                title: dialog.title,
                kind: dialog.address.peer.kind(),
            });
        }
        debug!(count = out.len(), "listed destinations");
        Ok(out)
    }

    /// Resolve and bind a destination. Returns the updated session so the
    /// caller can persist it.
    pub async fn select_destination(&self, destination: StorageDestination) -> Result<Session> {
        self.ensure_signed_in()?;
        self.check(self.resolver.resolve(&destination.id).await)?;

        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        info!(destination = %destination.id, title = %destination.title, "destination bound");
        session.destination = Some(destination);
        Ok(session.clone())
    }

    fn ensure_signed_in(&self) -> Result<()> {
        if self.is_signed_out() {
            return Err(TransportError::AuthExpired);
        }
        Ok(())
    }

    /// Latch the signed-out state on a credential rejection.
    fn check<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(TransportError::AuthExpired) = &result {
            if !self.signed_out.swap(true, Ordering::SeqCst) {
                warn!("credential rejected by transport, signing out");
            }
        }
        result
    }

    async fn bound_address(&self) -> Result<(DestinationId, PeerAddress)> {
        self.ensure_signed_in()?;
        let id = self
            .destination()
            .map(|d| d.id)
            .ok_or(TransportError::NoDestination)?;
        let address = self.check(self.resolver.resolve(&id).await)?;
        Ok((id, address))
    }
}

#[async_trait]
impl BlobTransport for TransportClient {
    fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    async fn send(
        &self,
        payload: &FilePayload,
        on_progress: &(dyn Fn(u8) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<RemoteRecord> {
        let size = payload.size();
        if size > self.max_upload_size {
            return Err(TransportError::Validation(format!(
                "{} is {size} bytes, limit is {} bytes",
                payload.name, self.max_upload_size
            )));
        }
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let (dest, address) = self.bound_address().await?;
        let caption = Caption::new(&payload.name, size, &payload.mime_type, Utc::now());
        let document = OutgoingDocument {
            file_name: payload.name.clone(),
            mime_type: payload.mime_type.clone(),
            caption: caption.to_json(),
            data: payload.data.clone(),
        };

        let mut last: Option<u8> = None;
        let mut sink = |sent: u64, total: u64| {
            if cancel.is_cancelled() {
                return ControlFlow::Break(());
            }
            let percent = if total == 0 {
                100
            } else {
                (sent.min(total) * 100 / total) as u8
            };
            if last.map_or(true, |prev| percent > prev) {
                last = Some(percent);
                on_progress(percent);
            }
            ControlFlow::Continue(())
        };

        let sent = self
            .api
            .send_document(&address, document, &mut sink)
            .await;
        let message = self.check(sent)?;
        if last != Some(100) {
            on_progress(100);
        }

        let doc = message.document.ok_or_else(|| {
            TransportError::Transfer("transport returned a message without document".into())
        })?;
        let locator = RemoteLocator(message.id);
        let file_unique_id = match doc.unique_id {
            Some(id) if !id.is_empty() => FileUniqueId::new(id),
            _ => FileUniqueId::derive(&dest, locator),
        };

        info!(name = %payload.name, size, locator = %locator, "blob stored");
        Ok(RemoteRecord {
            locator,
            file_id: doc.id.to_string(),
            file_unique_id,
            size: doc.size,
            thumbnail_locator: doc.has_thumbnail.then_some(locator),
            created_at: message.date,
        })
    }

    async fn fetch(&self, locator: RemoteLocator) -> Result<Bytes> {
        let (_, address) = self.bound_address().await?;
        let data = self.check(
            self.api
                .download(&address, locator.0, DownloadSize::Full)
                .await,
        )?;
        data.ok_or_else(|| TransportError::NotFound(format!("message {locator}")))
    }

    async fn fetch_thumbnail(&self, locator: RemoteLocator) -> Option<Bytes> {
        let (_, address) = self.bound_address().await.ok()?;
        match self
            .api
            .download(&address, locator.0, DownloadSize::Thumbnail)
            .await
        {
            Ok(data) => data,
            Err(e) => {
                let _ = self.check::<()>(Err(e.clone()));
                debug!(locator = %locator, error = %e, "thumbnail unavailable");
                None
            }
        }
    }

    async fn remove(&self, locator: RemoteLocator) -> Result<bool> {
        let (_, address) = self.bound_address().await?;
        match self.api.delete_messages(&address, &[locator.0]).await {
            Ok(deleted) => {
                if deleted == 0 {
                    debug!(locator = %locator, "record was already gone");
                }
                Ok(true)
            }
            Err(TransportError::NotFound(_)) => Ok(true),
            Err(TransportError::AuthExpired) => self.check(Err(TransportError::AuthExpired)),
            Err(e) => {
                warn!(locator = %locator, error = %e, "remote delete failed");
                Ok(false)
            }
        }
    }

    async fn list_existing(&self, limit: usize) -> Result<Vec<StoredFile>> {
        let (dest, address) = self.bound_address().await?;
        let messages = self.check(self.api.documents(&address, limit).await)?;
        let files: Vec<StoredFile> = messages
            .iter()
            .filter_map(|m| stored_file_from_message(&dest, m))
            .collect();
        debug!(destination = %dest, count = files.len(), "listed remote records");
        Ok(files)
    }
}
