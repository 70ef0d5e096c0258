//! Mapping of transport messages to [`StoredFile`] records.
//!
//! Parcel-posted blobs carry a JSON caption with the original name, type and
//! upload time. Anything else in the destination (forwarded files, blobs from
//! other clients, hand-edited captions) falls back to the document's own
//! attributes. This mapping never fails for a message that has a document.

use parcel_shared::mime::guess_from_name;
use parcel_shared::{Caption, DestinationId, FileUniqueId, RemoteLocator, StoredFile};

use crate::api::RemoteMessage;

/// Build a record from a listed message. `None` when it carries no document.
pub fn stored_file_from_message(destination: &DestinationId, msg: &RemoteMessage) -> Option<StoredFile> {
    let doc = msg.document.as_ref()?;
    let caption = Caption::parse(msg.caption.as_deref());
    let locator = RemoteLocator(msg.id);

    let name = match &caption {
        Some(c) => c.name.clone(),
        None => doc
            .file_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("file_{}", msg.id)),
    };

    let mime_type = match &caption {
        Some(c) => c.mime_type.clone(),
        None => doc
            .mime_type
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| guess_from_name(&name).to_string()),
    };

    let created_at = caption
        .as_ref()
        .and_then(Caption::uploaded_at)
        .unwrap_or(msg.date);

    let file_unique_id = doc
        .unique_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .map(FileUniqueId::new)
        .unwrap_or_else(|| FileUniqueId::derive(destination, locator));

    Some(StoredFile {
        file_id: doc.id.to_string(),
        file_unique_id,
        size: doc.size,
        name,
        mime_type,
        created_at,
        remote_locator: Some(locator),
        thumbnail_locator: doc.has_thumbnail.then_some(locator),
        folder_path: None,
        is_favorite: false,
        is_deleted: false,
        deleted_at: None,
    })
}
