//! Merge of the transport listing with the local index.
//!
//! The listing decides which records exist and supplies their blob
//! attributes (locator, size, name, type). The index supplies the virtual
//! attributes (folder, favorite, trash). Records the transport does not list
//! are left out of the working set but stay in the index, so a listing cut
//! short by its limit never destroys local state.

use std::collections::HashMap;

use parcel_shared::{FileUniqueId, StoredFile};

pub fn reconcile(remote: Vec<StoredFile>, local: &[StoredFile]) -> Vec<StoredFile> {
    let by_id: HashMap<&FileUniqueId, &StoredFile> =
        local.iter().map(|f| (&f.file_unique_id, f)).collect();

    remote
        .into_iter()
        .map(|mut file| {
            if let Some(known) = by_id.get(&file.file_unique_id) {
                file.folder_path = known.folder_path.clone();
                file.is_favorite = known.is_favorite;
                file.is_deleted = known.is_deleted;
                file.deleted_at = known.deleted_at;
            }
            file
        })
        .collect()
}

/// Index records the listing did not return.
pub fn missing_remotely<'a>(remote: &[StoredFile], local: &'a [StoredFile]) -> Vec<&'a StoredFile> {
    let listed: std::collections::HashSet<&FileUniqueId> =
        remote.iter().map(|f| &f.file_unique_id).collect();
    local
        .iter()
        .filter(|f| !listed.contains(&f.file_unique_id))
        .collect()
}

/// Index records the listing did not return that are no newer than its
/// oldest entry. For a listing cut short by its limit these were never in
/// the window, so their absence says nothing. An empty listing covers
/// nothing and returns every index record.
pub fn unlisted_beyond<'a>(remote: &[StoredFile], local: &'a [StoredFile]) -> Vec<&'a StoredFile> {
    let oldest = remote.iter().map(|f| f.created_at).min();
    missing_remotely(remote, local)
        .into_iter()
        .filter(|f| oldest.map_or(true, |cutoff| f.created_at <= cutoff))
        .collect()
}
