//! The virtual file system coordinator.
//!
//! A [`Drive`] combines the blob transport (the only durable record of file
//! existence and content) with the local index (folders, favorites, trash)
//! and republishes the merged result as the visible file listing.
//!
//! Remote verbs go through the transport and are best effort where the
//! local outcome must not depend on the network: deleting a file purges it
//! locally even if the remote delete fails. Local verbs (trash, restore,
//! move, favorite, every folder operation) never touch the transport.
//!
//! Locks (`index`, `files`, `uploads`, `view`, `selection`) are plain std
//! mutexes and are never held across an `.await`. When two are taken at once
//! the order is index before files, and index before the refresh log.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parcel_net::{BlobTransport, RemoteRecord, TransportError};
use parcel_shared::{FilePayload, FileUniqueId, StoredFile, UploadId};
use parcel_store::{parent_of, Database, FileFilter, StoreError, VirtualFolder};

use crate::config::DriveConfig;
use crate::error::{DriveError, Result};
use crate::events::{emit_event, DriveEvent, EVENT_CHANNEL_CAPACITY};
use crate::reconcile::{missing_remotely, reconcile, unlisted_beyond};
use crate::view::{self, SortDirection, SortKey, TypeFilter, ViewOptions, ViewScope};

// ---------------------------------------------------------------------------
// Upload queue
// ---------------------------------------------------------------------------

/// State of a queued upload. A successful upload leaves the queue and
/// appears in the file listing as a live record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadState {
    Pending,
    Uploading { percent: u8 },
    /// Kept with its payload until retried or dismissed.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEntry {
    pub upload_id: UploadId,
    /// Key of the pending record, see [`FileUniqueId::pending`].
    pub file_unique_id: FileUniqueId,
    pub name: String,
    pub size: u64,
    /// Folder that was open when the upload was queued.
    pub folder_path: Option<String>,
    pub state: UploadState,
}

struct UploadSlot {
    entry: UploadEntry,
    payload: FilePayload,
    cancel: CancellationToken,
}

// ---------------------------------------------------------------------------
// Batch results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub file_unique_id: FileUniqueId,
    pub reason: String,
}

/// Outcome of a multi-record delete. A record whose remote delete failed is
/// still purged locally and appears in both lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub purged: Vec<FileUniqueId>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    /// Number of distinct records the batch touched.
    pub fn attempted(&self) -> usize {
        let unpurged = self
            .failures
            .iter()
            .filter(|f| !self.purged.contains(&f.file_unique_id))
            .count();
        self.purged.len() + unpurged
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// `Err(PartialBatchFailure)` when anything failed.
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(DriveError::PartialBatchFailure(self))
        }
    }
}

// ---------------------------------------------------------------------------
// Refresh log
// ---------------------------------------------------------------------------

/// Index changes made while a transport listing is in flight. The listing
/// is a snapshot from before them, so the merge must not undo them.
#[derive(Debug, Default)]
struct RefreshLog {
    active: usize,
    purged: HashSet<FileUniqueId>,
    added: HashSet<FileUniqueId>,
}

// ---------------------------------------------------------------------------
// Drive
// ---------------------------------------------------------------------------

pub struct Drive {
    transport: Arc<dyn BlobTransport>,
    index: Mutex<Database>,
    config: DriveConfig,
    /// Working set: reconciled records, live and trashed.
    files: RwLock<Vec<StoredFile>>,
    /// Queue order is insertion order.
    uploads: Mutex<Vec<UploadSlot>>,
    view: RwLock<ViewOptions>,
    selection: Mutex<HashSet<FileUniqueId>>,
    refresh_log: Mutex<RefreshLog>,
    events: broadcast::Sender<DriveEvent>,
    signed_out: AtomicBool,
}

impl Drive {
    /// Open a drive over `transport`. Until the first [`Self::refresh`] the
    /// working set is whatever the index holds.
    pub fn open(transport: Arc<dyn BlobTransport>, index: Database, config: DriveConfig) -> Result<Self> {
        let files = index.get_all(&FileFilter::all())?;
        info!(records = files.len(), "drive opened from local index");

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            transport,
            index: Mutex::new(index),
            config,
            files: RwLock::new(files),
            uploads: Mutex::new(Vec::new()),
            view: RwLock::new(ViewOptions::default()),
            selection: Mutex::new(HashSet::new()),
            refresh_log: Mutex::new(RefreshLog::default()),
            events,
            signed_out: AtomicBool::new(false),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DriveEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    pub fn is_signed_out(&self) -> bool {
        self.signed_out.load(Ordering::SeqCst)
    }

    /// Effective upload ceiling: the stricter of the configured and the
    /// transport's limit.
    pub fn max_upload_size(&self) -> u64 {
        self.config.max_upload_size.min(self.transport.max_upload_size())
    }

    // ------------------------------------------------------------------
    // Uploads
    // ------------------------------------------------------------------

    /// Upload one file into the open folder.
    pub async fn upload(&self, payload: FilePayload) -> Result<StoredFile> {
        let upload_id = self.queue_upload(payload)?;
        self.run_upload(upload_id).await
    }

    /// Upload several files, `upload_concurrency` at a time. Results are in
    /// input order; one failure never cancels the others.
    pub async fn upload_batch(&self, payloads: Vec<FilePayload>) -> Vec<Result<StoredFile>> {
        let mut results: Vec<Option<Result<StoredFile>>> = Vec::with_capacity(payloads.len());
        let mut queued = Vec::new();
        for (i, payload) in payloads.into_iter().enumerate() {
            match self.queue_upload(payload) {
                Ok(upload_id) => {
                    queued.push((i, upload_id));
                    results.push(None);
                }
                Err(e) => results.push(Some(Err(e))),
            }
        }

        let concurrency = self.config.upload_concurrency.max(1);
        let finished: Vec<(usize, Result<StoredFile>)> = stream::iter(queued)
            .map(|(i, upload_id)| async move { (i, self.run_upload(upload_id).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        for (i, result) in finished {
            results[i] = Some(result);
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or(Err(DriveError::Cancelled)))
            .collect()
    }

    /// Snapshot of the upload queue (pending, in flight and failed).
    pub fn uploads(&self) -> Vec<UploadEntry> {
        self.slots().iter().map(|s| s.entry.clone()).collect()
    }

    /// Abort an upload and drop it from the queue. Returns `false` if the
    /// upload is unknown (already finished or dismissed).
    pub fn cancel_upload(&self, upload_id: UploadId) -> bool {
        match self.take_slot(upload_id) {
            Some(slot) => {
                slot.cancel.cancel();
                info!(upload_id = %upload_id, "upload cancelled");
                true
            }
            None => false,
        }
    }

    /// Run a failed upload again with its retained payload.
    pub async fn retry_upload(&self, upload_id: UploadId) -> Result<StoredFile> {
        self.ensure_signed_in()?;
        {
            let mut slots = self.slots();
            let slot = slots
                .iter_mut()
                .find(|s| s.entry.upload_id == upload_id)
                .ok_or_else(|| DriveError::NotFound(format!("upload {upload_id}")))?;
            if !matches!(slot.entry.state, UploadState::Failed { .. }) {
                return Err(DriveError::Validation(format!(
                    "upload {upload_id} has not failed"
                )));
            }
            slot.entry.state = UploadState::Pending;
            slot.cancel = CancellationToken::new();
        }
        info!(upload_id = %upload_id, "retrying upload");
        self.run_upload(upload_id).await
    }

    /// Forget an upload, whatever its state.
    pub fn dismiss_upload(&self, upload_id: UploadId) -> Result<()> {
        let slot = self
            .take_slot(upload_id)
            .ok_or_else(|| DriveError::NotFound(format!("upload {upload_id}")))?;
        slot.cancel.cancel();
        debug!(upload_id = %upload_id, "upload dismissed");
        Ok(())
    }

    /// Validate and enqueue. Nothing reaches the transport for a payload
    /// rejected here.
    fn queue_upload(&self, payload: FilePayload) -> Result<UploadId> {
        self.ensure_signed_in()?;
        let size = payload.size();
        let limit = self.max_upload_size();
        if size > limit {
            debug!(name = %payload.name, size, limit, "upload rejected");
            return Err(DriveError::Validation(format!(
                "{} is {size} bytes, limit is {limit} bytes",
                payload.name
            )));
        }

        let upload_id = UploadId::new();
        let entry = UploadEntry {
            upload_id,
            file_unique_id: FileUniqueId::pending(&upload_id),
            name: payload.name.clone(),
            size,
            folder_path: self.open_folder_path(),
            state: UploadState::Pending,
        };
        let name = entry.name.clone();
        self.slots().push(UploadSlot {
            entry,
            payload,
            cancel: CancellationToken::new(),
        });

        debug!(upload_id = %upload_id, name = %name, size, "upload queued");
        emit_event(&self.events, DriveEvent::UploadQueued { upload_id, name });
        Ok(upload_id)
    }

    async fn run_upload(&self, upload_id: UploadId) -> Result<StoredFile> {
        let (payload, cancel, folder_path) = {
            let mut slots = self.slots();
            let slot = slots
                .iter_mut()
                .find(|s| s.entry.upload_id == upload_id)
                .ok_or(DriveError::Cancelled)?;
            slot.entry.state = UploadState::Uploading { percent: 0 };
            (
                slot.payload.clone(),
                slot.cancel.clone(),
                slot.entry.folder_path.clone(),
            )
        };

        let on_progress = |percent: u8| {
            self.update_slot(upload_id, |slot| {
                slot.entry.state = UploadState::Uploading { percent }
            });
            emit_event(&self.events, DriveEvent::UploadProgress { upload_id, percent });
        };

        match self.transport.send(&payload, &on_progress, &cancel).await {
            Ok(record) => self.finish_upload(upload_id, &payload, folder_path, record).await,
            Err(e) => Err(self.fail_upload(upload_id, e.into())),
        }
    }

    async fn finish_upload(
        &self,
        upload_id: UploadId,
        payload: &FilePayload,
        folder_path: Option<String>,
        record: RemoteRecord,
    ) -> Result<StoredFile> {
        let wanted = self
            .take_slot(upload_id)
            .is_some_and(|slot| !slot.cancel.is_cancelled());
        if !wanted {
            // cancelled or deleted after the last chunk went out
            info!(upload_id = %upload_id, locator = %record.locator, "discarding cancelled upload");
            if let Err(e) = self.transport.remove(record.locator).await {
                self.observe(e.into());
            }
            emit_event(
                &self.events,
                DriveEvent::UploadFailed {
                    upload_id,
                    reason: DriveError::Cancelled.to_string(),
                },
            );
            return Err(DriveError::Cancelled);
        }

        let indexed = self.db(|db| {
            // the folder may have been deleted while the upload ran
            let folder_path = match folder_path {
                Some(path) => db.get_folder_by_path(&path)?.map(|folder| folder.path),
                None => None,
            };
            let file = StoredFile {
                file_id: record.file_id,
                file_unique_id: record.file_unique_id,
                size: record.size,
                name: payload.name.clone(),
                mime_type: payload.mime_type.clone(),
                created_at: record.created_at,
                remote_locator: Some(record.locator),
                thumbnail_locator: record.thumbnail_locator,
                folder_path,
                is_favorite: false,
                is_deleted: false,
                deleted_at: None,
            };
            db.upsert(&file)?;
            self.log_refresh_change(|log| {
                log.added.insert(file.file_unique_id.clone());
            });
            Ok(file)
        });
        let file = match indexed {
            Ok(file) => file,
            Err(e) => {
                warn!(upload_id = %upload_id, locator = %record.locator, error = %e, "stored blob could not be indexed");
                emit_event(
                    &self.events,
                    DriveEvent::UploadFailed {
                        upload_id,
                        reason: e.to_string(),
                    },
                );
                return Err(e);
            }
        };
        self.insert_cached(file.clone());

        info!(
            upload_id = %upload_id,
            file_unique_id = %file.file_unique_id,
            size = file.size,
            "upload finished"
        );
        emit_event(
            &self.events,
            DriveEvent::UploadFinished {
                upload_id,
                file_unique_id: file.file_unique_id.clone(),
            },
        );
        emit_event(&self.events, DriveEvent::FilesChanged);
        Ok(file)
    }

    fn fail_upload(&self, upload_id: UploadId, err: DriveError) -> DriveError {
        let err = self.observe(err);
        match &err {
            DriveError::Cancelled | DriveError::Validation(_) => {
                self.take_slot(upload_id);
                info!(upload_id = %upload_id, reason = %err, "upload dropped");
            }
            other => {
                let reason = other.to_string();
                self.update_slot(upload_id, |slot| {
                    slot.entry.state = UploadState::Failed { reason }
                });
                warn!(upload_id = %upload_id, error = %err, "upload failed");
            }
        }
        emit_event(
            &self.events,
            DriveEvent::UploadFailed {
                upload_id,
                reason: err.to_string(),
            },
        );
        err
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Delete a file for good. The remote delete is best effort; the record
    /// leaves the index and the listing either way. Returns whether the
    /// remote copy is confirmed gone.
    ///
    /// Deleting the pending record of an upload cancels that upload instead.
    pub async fn delete(&self, id: &FileUniqueId) -> Result<bool> {
        if self.cancel_pending(id) {
            emit_event(&self.events, DriveEvent::FilesChanged);
            return Ok(true);
        }

        let file = self.lookup(id)?;
        let remote_failure = self.purge(file).await?;
        emit_event(&self.events, DriveEvent::FilesChanged);
        Ok(remote_failure.is_none())
    }

    /// Delete every selected file and clear the selection.
    pub async fn delete_selected(&self) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for id in self.selection() {
            if self.cancel_pending(&id) {
                report.purged.push(id);
                continue;
            }
            let file = match self.lookup(&id) {
                Ok(file) => file,
                Err(e) => {
                    report.failures.push(BatchFailure {
                        file_unique_id: id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if let Some(reason) = self.purge(file).await? {
                report.failures.push(BatchFailure {
                    file_unique_id: id.clone(),
                    reason,
                });
            }
            report.purged.push(id);
        }
        self.clear_selection();

        info!(
            purged = report.purged.len(),
            failed = report.failures.len(),
            "deleted selection"
        );
        emit_event(&self.events, DriveEvent::FilesChanged);
        Ok(report)
    }

    /// Hard-delete everything in the trash. Remote failures are collected in
    /// the report and never stop the batch.
    pub async fn empty_trash(&self) -> Result<BatchReport> {
        let trashed = self.db(|db| db.get_all(&FileFilter::trashed()))?;
        let mut report = BatchReport::default();
        for file in trashed {
            let id = file.file_unique_id.clone();
            if let Some(reason) = self.purge(file).await? {
                report.failures.push(BatchFailure {
                    file_unique_id: id.clone(),
                    reason,
                });
            }
            report.purged.push(id);
        }

        info!(
            purged = report.purged.len(),
            failed = report.failures.len(),
            "trash emptied"
        );
        emit_event(&self.events, DriveEvent::FilesChanged);
        Ok(report)
    }

    /// Best-effort remote removal followed by an unconditional index purge.
    /// Returns the remote failure, if any.
    async fn purge(&self, file: StoredFile) -> Result<Option<String>> {
        let remote_failure = match file.remote_locator {
            None => None,
            Some(locator) => match self.transport.remove(locator).await {
                Ok(true) => None,
                Ok(false) => Some(format!("transport refused to delete record {locator}")),
                Err(e) => Some(self.observe(e.into()).to_string()),
            },
        };
        if let Some(reason) = &remote_failure {
            warn!(file_unique_id = %file.file_unique_id, reason = %reason, "remote copy not deleted");
        }

        let id = &file.file_unique_id;
        self.db(|db| {
            db.purge(id)?;
            self.log_refresh_change(|log| {
                log.purged.insert(id.clone());
            });
            Ok(())
        })?;
        self.remove_cached(id);
        self.selection_mut().remove(id);
        debug!(file_unique_id = %id, "record purged");
        Ok(remote_failure)
    }

    fn cancel_pending(&self, id: &FileUniqueId) -> bool {
        let upload_id = self
            .slots()
            .iter()
            .find(|s| s.entry.file_unique_id == *id)
            .map(|s| s.entry.upload_id);
        upload_id.is_some_and(|upload_id| self.cancel_upload(upload_id))
    }

    // ------------------------------------------------------------------
    // Local-only verbs
    // ------------------------------------------------------------------

    pub fn trash(&self, id: &FileUniqueId) -> Result<()> {
        self.db(|db| db.soft_delete(id))
            .map_err(|e| with_file_context(e, id))?;
        self.reload_cached(id)?;
        self.selection_mut().remove(id);
        debug!(file_unique_id = %id, "moved to trash");
        emit_event(&self.events, DriveEvent::FilesChanged);
        Ok(())
    }

    pub fn restore(&self, id: &FileUniqueId) -> Result<()> {
        self.db(|db| db.restore(id))
            .map_err(|e| with_file_context(e, id))?;
        self.reload_cached(id)?;
        debug!(file_unique_id = %id, "restored from trash");
        emit_event(&self.events, DriveEvent::FilesChanged);
        Ok(())
    }

    /// Move a file into a folder (`None` = root).
    pub fn move_to_folder(&self, id: &FileUniqueId, path: Option<&str>) -> Result<()> {
        self.db(|db| db.set_folder(id, path))
            .map_err(|e| with_file_context(e, id))?;
        self.reload_cached(id)?;
        debug!(file_unique_id = %id, folder = ?path, "moved file");
        emit_event(&self.events, DriveEvent::FilesChanged);
        Ok(())
    }

    /// Flip the favorite flag and return the new value.
    pub fn toggle_favorite(&self, id: &FileUniqueId) -> Result<bool> {
        let favorite = self
            .db(|db| db.toggle_favorite(id))
            .map_err(|e| with_file_context(e, id))?;
        self.reload_cached(id)?;
        emit_event(&self.events, DriveEvent::FilesChanged);
        Ok(favorite)
    }

    // ------------------------------------------------------------------
    // Folders
    // ------------------------------------------------------------------

    pub fn folders(&self) -> Result<Vec<VirtualFolder>> {
        self.db(|db| db.list_folders())
    }

    pub fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<VirtualFolder> {
        let folder = self.db(|db| db.create_folder(name, parent))?;
        emit_event(&self.events, DriveEvent::FilesChanged);
        Ok(folder)
    }

    pub fn rename_folder(&self, path: &str, new_name: &str) -> Result<VirtualFolder> {
        let folder = self.db(|db| db.rename_folder(path, new_name))?;
        self.resync_attributes()?;

        let mut view = self.view_mut();
        let rebased = match &view.scope {
            ViewScope::Folder(Some(open)) => rebase(open, path, &folder.path),
            _ => None,
        };
        if let Some(rebased) = rebased {
            view.scope = ViewScope::Folder(Some(rebased));
        }
        drop(view);

        emit_event(&self.events, DriveEvent::FilesChanged);
        Ok(folder)
    }

    /// Delete a folder subtree. Its files move to the parent folder. Returns
    /// the number of files moved.
    pub fn delete_folder(&self, path: &str) -> Result<usize> {
        let moved = self.db(|db| db.delete_folder(path))?;
        self.resync_attributes()?;

        let mut view = self.view_mut();
        let inside = matches!(&view.scope, ViewScope::Folder(Some(open)) if rebase(open, path, path).is_some());
        if inside {
            view.scope = ViewScope::Folder(parent_of(path).map(str::to_string));
        }
        drop(view);

        emit_event(&self.events, DriveEvent::FilesChanged);
        Ok(moved)
    }

    /// Show the contents of a folder (`None` = root).
    pub fn open_folder(&self, path: Option<&str>) -> Result<()> {
        if let Some(path) = path {
            if self.db(|db| db.get_folder_by_path(path))?.is_none() {
                return Err(DriveError::NotFound(format!("folder {path}")));
            }
        }
        self.view_mut().scope = ViewScope::Folder(path.map(str::to_string));
        Ok(())
    }

    // ------------------------------------------------------------------
    // View
    // ------------------------------------------------------------------

    pub fn set_filter(&self, filter: TypeFilter) {
        self.view_mut().filter = filter;
    }

    pub fn set_sort(&self, key: SortKey, direction: SortDirection) {
        let mut view = self.view_mut();
        view.sort = key;
        view.direction = direction;
    }

    pub fn set_search(&self, search: impl Into<String>) {
        self.view_mut().search = search.into();
    }

    pub fn set_scope(&self, scope: ViewScope) {
        self.view_mut().scope = scope;
    }

    pub fn view_options(&self) -> ViewOptions {
        self.view.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn visible_files(&self) -> Vec<StoredFile> {
        let opts = self.view_options();
        view::visible_files(&self.files_ref(), &opts)
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    pub fn select(&self, id: FileUniqueId) {
        self.selection_mut().insert(id);
    }

    pub fn deselect(&self, id: &FileUniqueId) {
        self.selection_mut().remove(id);
    }

    /// Returns whether `id` is selected afterwards.
    pub fn toggle_selection(&self, id: FileUniqueId) -> bool {
        let mut selection = self.selection_mut();
        if selection.remove(&id) {
            false
        } else {
            selection.insert(id);
            true
        }
    }

    pub fn clear_selection(&self) {
        self.selection_mut().clear();
    }

    pub fn selection(&self) -> Vec<FileUniqueId> {
        let mut ids: Vec<FileUniqueId> = self.selection_mut().iter().cloned().collect();
        ids.sort();
        ids
    }

    // ------------------------------------------------------------------
    // Remote reads
    // ------------------------------------------------------------------

    /// Rebuild the working set from the transport listing and the index.
    ///
    /// Newly discovered records are persisted with default attributes. If
    /// the listing fails with a transfer error the index alone is shown.
    ///
    /// Records purged while the listing was in flight stay purged, and
    /// records indexed meanwhile are kept. A listing that fills its limit is
    /// partial: indexed records older than its oldest entry stay visible.
    pub async fn refresh(&self) -> Result<()> {
        self.ensure_signed_in()?;
        let limit = self.config.list_limit;
        self.refresh_log_mut().active += 1;
        let listed = self.transport.list_existing(limit).await;

        let remote = match listed {
            Ok(remote) => Some(remote),
            Err(TransportError::Transfer(reason)) => {
                warn!(reason = %reason, "listing failed, showing local index only");
                None
            }
            Err(e) => {
                self.close_refresh_log();
                return Err(self.observe(e.into()));
            }
        };

        let files = self.db(|db| {
            let log = self.close_refresh_log();
            let local = db.get_all(&FileFilter::all())?;
            let Some(remote) = remote else {
                return Ok(local);
            };

            let mut kept: Vec<&StoredFile> = if remote.len() >= limit {
                unlisted_beyond(&remote, &local)
            } else {
                Vec::new()
            };
            let missing = missing_remotely(&remote, &local);
            let orphans = missing.len();
            kept.extend(
                missing
                    .into_iter()
                    .filter(|f| log.added.contains(&f.file_unique_id)),
            );

            let remote: Vec<StoredFile> = remote
                .into_iter()
                .filter(|f| !log.purged.contains(&f.file_unique_id))
                .collect();
            let mut merged = reconcile(remote, &local);

            let tx = db.conn().unchecked_transaction()?;
            for file in &merged {
                db.upsert(file)?;
            }
            tx.commit()?;

            let mut seen: HashSet<FileUniqueId> =
                merged.iter().map(|f| f.file_unique_id.clone()).collect();
            for file in kept {
                if seen.insert(file.file_unique_id.clone()) {
                    merged.push(file.clone());
                }
            }
            info!(records = merged.len(), orphans, "reconciled with transport");
            Ok(merged)
        })?;
        *self.files_mut() = files;

        emit_event(&self.events, DriveEvent::FilesChanged);
        Ok(())
    }

    /// Full content of a file.
    pub async fn download(&self, id: &FileUniqueId) -> Result<Bytes> {
        self.ensure_signed_in()?;
        let file = self.lookup(id)?;
        let locator = file
            .remote_locator
            .ok_or_else(|| DriveError::NotFound(format!("file {id} has no remote copy")))?;
        self.transport
            .fetch(locator)
            .await
            .map_err(|e| self.observe(e.into()))
    }

    /// Preview bytes for media files. Failures are not reported.
    pub async fn thumbnail(&self, id: &FileUniqueId) -> Option<Bytes> {
        if self.is_signed_out() {
            return None;
        }
        let locator = self.lookup(id).ok()?.thumbnail_locator?;
        self.transport.fetch_thumbnail(locator).await
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn ensure_signed_in(&self) -> Result<()> {
        if self.is_signed_out() {
            return Err(DriveError::AuthExpired);
        }
        Ok(())
    }

    /// Flip to signed-out on the first credential rejection.
    fn observe(&self, err: DriveError) -> DriveError {
        if err.is_auth_expired() && !self.signed_out.swap(true, Ordering::SeqCst) {
            warn!("session expired, drive signed out");
            emit_event(&self.events, DriveEvent::SignedOut);
        }
        err
    }

    fn db<T>(&self, f: impl FnOnce(&Database) -> parcel_store::Result<T>) -> Result<T> {
        let db = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&db)?)
    }

    fn lookup(&self, id: &FileUniqueId) -> Result<StoredFile> {
        let cached = self
            .files_ref()
            .iter()
            .find(|f| f.file_unique_id == *id)
            .cloned();
        match cached {
            Some(file) => Ok(file),
            None => self
                .db(|db| db.get_file(id))
                .map_err(|e| with_file_context(e, id)),
        }
    }

    fn open_folder_path(&self) -> Option<String> {
        match &self.view.read().unwrap_or_else(PoisonError::into_inner).scope {
            ViewScope::Folder(path) => path.clone(),
            _ => None,
        }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<UploadSlot>> {
        self.uploads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_slot(&self, upload_id: UploadId) -> Option<UploadSlot> {
        let mut slots = self.slots();
        let pos = slots.iter().position(|s| s.entry.upload_id == upload_id)?;
        Some(slots.remove(pos))
    }

    fn update_slot(&self, upload_id: UploadId, f: impl FnOnce(&mut UploadSlot)) {
        if let Some(slot) = self
            .slots()
            .iter_mut()
            .find(|s| s.entry.upload_id == upload_id)
        {
            f(slot);
        }
    }

    fn files_ref(&self) -> RwLockReadGuard<'_, Vec<StoredFile>> {
        self.files.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn files_mut(&self) -> RwLockWriteGuard<'_, Vec<StoredFile>> {
        self.files.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn view_mut(&self) -> RwLockWriteGuard<'_, ViewOptions> {
        self.view.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn selection_mut(&self) -> MutexGuard<'_, HashSet<FileUniqueId>> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh_log_mut(&self) -> MutexGuard<'_, RefreshLog> {
        self.refresh_log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an index change if a refresh listing is in flight.
    fn log_refresh_change(&self, f: impl FnOnce(&mut RefreshLog)) {
        let mut log = self.refresh_log_mut();
        if log.active > 0 {
            f(&mut log);
        }
    }

    /// End one refresh and return what changed while it listed. The log is
    /// reset once no refresh is in flight.
    fn close_refresh_log(&self) -> RefreshLog {
        let mut log = self.refresh_log_mut();
        log.active = log.active.saturating_sub(1);
        let changes = RefreshLog {
            active: log.active,
            purged: log.purged.clone(),
            added: log.added.clone(),
        };
        if log.active == 0 {
            log.purged.clear();
            log.added.clear();
        }
        changes
    }

    fn insert_cached(&self, file: StoredFile) {
        let mut files = self.files_mut();
        files.retain(|f| f.file_unique_id != file.file_unique_id);
        files.push(file);
    }

    fn remove_cached(&self, id: &FileUniqueId) {
        self.files_mut().retain(|f| f.file_unique_id != *id);
    }

    /// Replace the cached copy of `id` with the indexed one.
    fn reload_cached(&self, id: &FileUniqueId) -> Result<()> {
        let fresh = self.db(|db| db.get_file(id))?;
        if let Some(slot) = self
            .files_mut()
            .iter_mut()
            .find(|f| f.file_unique_id == *id)
        {
            *slot = fresh;
        }
        Ok(())
    }

    /// Re-apply indexed virtual attributes to the whole working set.
    fn resync_attributes(&self) -> Result<()> {
        let local = self.db(|db| db.get_all(&FileFilter::all()))?;
        let mut files = self.files_mut();
        let current = std::mem::take(&mut *files);
        *files = reconcile(current, &local);
        Ok(())
    }
}

/// Attach the file id to a bare "record not found" from the index.
fn with_file_context(err: DriveError, id: &FileUniqueId) -> DriveError {
    match err {
        DriveError::Index(StoreError::NotFound) => DriveError::NotFound(format!("file {id}")),
        other => other,
    }
}

/// `path` re-rooted from `old` to `new` when it lies at or below `old`.
fn rebase(path: &str, old: &str, new: &str) -> Option<String> {
    if path == old {
        return Some(new.to_string());
    }
    path.strip_prefix(old)
        .filter(|rest| rest.starts_with('/'))
        .map(|rest| format!("{new}{rest}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_net::{MemoryMessenger, TransportClient};
    use parcel_shared::{Session, StorageDestination};

    async fn setup_with(config: DriveConfig) -> (Arc<MemoryMessenger>, Drive, tempfile::TempDir) {
        // RUST_LOG=parcel_client=debug shows the drive's log lines
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let api = Arc::new(MemoryMessenger::new(b"cred".to_vec(), 7).with_chunk_size(8));
        let session =
            Session::new(b"cred".to_vec()).with_destination(StorageDestination::self_notes());
        let client = TransportClient::connect(api.clone(), session).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(dir.path()).unwrap();
        let drive = Drive::open(Arc::new(client), db, config).unwrap();
        (api, drive, dir)
    }

    async fn setup() -> (Arc<MemoryMessenger>, Drive, tempfile::TempDir) {
        setup_with(DriveConfig::default()).await
    }

    fn text(name: &str, body: &str) -> FilePayload {
        FilePayload::new(name, body.as_bytes().to_vec())
    }

    fn drain(rx: &mut broadcast::Receiver<DriveEvent>) -> Vec<DriveEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_upload_then_download_round_trip() {
        let (_api, drive, _dir) = setup().await;
        let mut rx = drive.subscribe();
        let body = "the quick brown fox jumps over the lazy dog";

        let file = drive.upload(text("fox.txt", body)).await.unwrap();
        assert!(file.is_live());
        assert_eq!(file.size, body.len() as u64);
        assert_eq!(file.mime_type, "text/plain");

        let data = drive.download(&file.file_unique_id).await.unwrap();
        assert_eq!(&data[..], body.as_bytes());
        assert_eq!(drive.visible_files(), vec![file.clone()]);
        assert!(drive.uploads().is_empty());

        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(DriveEvent::UploadQueued { .. })));
        let progress: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                DriveEvent::UploadProgress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&100));
        assert!(events.iter().any(|e| matches!(
            e,
            DriveEvent::UploadFinished { file_unique_id, .. } if *file_unique_id == file.file_unique_id
        )));
    }

    #[tokio::test]
    async fn test_oversize_upload_never_reaches_transport() {
        let config = DriveConfig {
            max_upload_size: 16,
            ..Default::default()
        };
        let (api, drive, _dir) = setup_with(config).await;

        let err = drive
            .upload(FilePayload::new("big.bin", vec![0u8; 17]))
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::Validation(_)));
        assert_eq!(api.calls().send, 0);
        assert!(drive.visible_files().is_empty());
        assert!(drive.uploads().is_empty());

        // exactly at the limit is fine
        drive
            .upload(FilePayload::new("ok.bin", vec![0u8; 16]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_trash_and_restore_are_local() {
        let (api, drive, _dir) = setup().await;
        let file = drive.upload(text("a.txt", "aaa")).await.unwrap();
        let before = api.calls();

        drive.trash(&file.file_unique_id).unwrap();
        assert!(drive.visible_files().is_empty());
        drive.set_scope(ViewScope::Trash);
        assert_eq!(drive.visible_files().len(), 1);
        assert!(drive.visible_files()[0].deleted_at.is_some());

        drive.restore(&file.file_unique_id).unwrap();
        assert!(drive.visible_files().is_empty());
        drive.set_scope(ViewScope::Folder(None));
        let restored = &drive.visible_files()[0];
        assert_eq!(restored.remote_locator, file.remote_locator);
        assert!(!restored.is_deleted);

        assert_eq!(api.calls(), before);
        assert_eq!(api.calls().delete, 0);
    }

    #[tokio::test]
    async fn test_move_to_folder_is_non_destructive() {
        let (api, drive, _dir) = setup().await;
        let file = drive.upload(text("cv.pdf", "%PDF")).await.unwrap();
        drive.create_folder("Docs", None).unwrap();
        let before = api.calls();

        drive.move_to_folder(&file.file_unique_id, Some("/Docs")).unwrap();
        assert!(drive.visible_files().is_empty());

        drive.open_folder(Some("/Docs")).unwrap();
        let moved = drive.visible_files();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].remote_locator, file.remote_locator);
        assert_eq!(moved[0].folder_path.as_deref(), Some("/Docs"));
        assert_eq!(api.calls(), before);

        let err = drive
            .move_to_folder(&file.file_unique_id, Some("/Nope"))
            .unwrap_err();
        assert!(matches!(err, DriveError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_upload_lands_in_open_folder() {
        let (_api, drive, _dir) = setup().await;
        drive.create_folder("Photos", None).unwrap();
        drive.open_folder(Some("/Photos")).unwrap();

        let file = drive
            .upload(FilePayload::new("cat.jpg", vec![1u8; 10]))
            .await
            .unwrap();
        assert_eq!(file.folder_path.as_deref(), Some("/Photos"));
        assert_eq!(drive.visible_files().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_falls_back_to_native_attributes() {
        let (api, drive, _dir) = setup().await;
        api.post_raw(
            api.me().peer,
            Some("holiday pics, enjoy"),
            Some("beach.jpg"),
            Some("image/jpeg"),
            None,
            vec![9u8; 300],
        );

        drive.refresh().await.unwrap();
        let files = drive.visible_files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "beach.jpg");
        assert_eq!(files[0].mime_type, "image/jpeg");
        assert_eq!(files[0].size, 300);
        assert!(files[0].thumbnail_locator.is_some());
        assert!(drive.thumbnail(&files[0].file_unique_id).await.is_some());
    }

    #[tokio::test]
    async fn test_refresh_keeps_virtual_attributes() {
        let (api, drive, _dir) = setup().await;
        let file = drive.upload(text("keep.txt", "keep")).await.unwrap();
        drive.create_folder("Kept", None).unwrap();
        drive.move_to_folder(&file.file_unique_id, Some("/Kept")).unwrap();
        assert!(drive.toggle_favorite(&file.file_unique_id).unwrap());

        // a record deleted behind our back disappears from the listing only
        let gone = drive.upload(text("gone.txt", "gone")).await.unwrap();
        api.delete_externally(api.me().peer, gone.remote_locator.unwrap().0);

        drive.refresh().await.unwrap();
        drive.set_scope(ViewScope::Favorites);
        let files = drive.visible_files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].folder_path.as_deref(), Some("/Kept"));

        drive.set_scope(ViewScope::All);
        assert_eq!(drive.visible_files().len(), 1);
        assert!(drive.db(|db| db.get_file(&gone.file_unique_id)).is_ok());
    }

    #[tokio::test]
    async fn test_refresh_transfer_failure_uses_index() {
        let (api, drive, _dir) = setup().await;
        drive.upload(text("a.txt", "a")).await.unwrap();
        api.fail_listings(true);

        drive.refresh().await.unwrap();
        assert_eq!(drive.visible_files().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_empty_trash() {
        let (api, drive, _dir) = setup().await;
        let a = drive.upload(text("a.txt", "a")).await.unwrap();
        let b = drive.upload(text("b.txt", "b")).await.unwrap();
        let c = drive.upload(text("c.txt", "c")).await.unwrap();
        for f in [&a, &b, &c] {
            drive.trash(&f.file_unique_id).unwrap();
        }
        api.fail_delete(b.remote_locator.unwrap().0);

        let report = drive.empty_trash().await.unwrap();
        assert_eq!(report.purged.len(), 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].file_unique_id, b.file_unique_id);
        assert_eq!(report.attempted(), 3);

        assert!(drive.db(|db| db.get_all(&FileFilter::trashed())).unwrap().is_empty());
        assert_eq!(api.message_count(api.me().peer), 1);
        assert!(matches!(
            report.into_result(),
            Err(DriveError::PartialBatchFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_purges_despite_remote_failure() {
        let (api, drive, _dir) = setup().await;
        let file = drive.upload(text("stuck.txt", "x")).await.unwrap();
        api.fail_delete(file.remote_locator.unwrap().0);

        assert!(!drive.delete(&file.file_unique_id).await.unwrap());
        assert!(drive.visible_files().is_empty());
        assert!(drive.db(|db| db.get_file(&file.file_unique_id)).is_err());
        assert!(matches!(
            drive.delete(&file.file_unique_id).await,
            Err(DriveError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_upload_can_be_retried() {
        let (api, drive, _dir) = setup().await;
        api.fail_sends_after(1);

        let err = drive
            .upload(FilePayload::new("big.bin", vec![3u8; 40]))
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::Transfer(_)));

        let uploads = drive.uploads();
        assert_eq!(uploads.len(), 1);
        assert!(matches!(uploads[0].state, UploadState::Failed { .. }));
        assert!(drive.visible_files().is_empty());

        api.heal_sends();
        let file = drive.retry_upload(uploads[0].upload_id).await.unwrap();
        assert_eq!(file.size, 40);
        assert!(drive.uploads().is_empty());
        assert_eq!(drive.visible_files().len(), 1);
    }

    #[tokio::test]
    async fn test_dismiss_failed_upload() {
        let (api, drive, _dir) = setup().await;
        api.fail_sends_after(0);
        drive.upload(text("x.txt", "x")).await.unwrap_err();

        let upload_id = drive.uploads()[0].upload_id;
        assert!(matches!(
            drive.retry_upload(UploadId::new()).await,
            Err(DriveError::NotFound(_))
        ));
        drive.dismiss_upload(upload_id).unwrap();
        assert!(drive.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_in_flight_upload() {
        let (api, drive, _dir) = setup().await;
        let drive = Arc::new(drive);
        let mut rx = drive.subscribe();

        let task = tokio::spawn({
            let drive = drive.clone();
            async move { drive.upload(FilePayload::new("big.bin", vec![1u8; 64 * 1024])).await }
        });
        let upload_id = loop {
            if let DriveEvent::UploadProgress { upload_id, .. } = rx.recv().await.unwrap() {
                break upload_id;
            }
        };
        assert!(drive.cancel_upload(upload_id));

        assert!(matches!(task.await.unwrap(), Err(DriveError::Cancelled)));
        assert_eq!(api.message_count(api.me().peer), 0);
        assert!(drive.uploads().is_empty());
        assert!(drive.visible_files().is_empty());
    }

    #[tokio::test]
    async fn test_delete_during_upload_cancels_it() {
        let (api, drive, _dir) = setup().await;
        let drive = Arc::new(drive);
        let mut rx = drive.subscribe();

        let task = tokio::spawn({
            let drive = drive.clone();
            async move { drive.upload(FilePayload::new("big.bin", vec![1u8; 64 * 1024])).await }
        });
        let upload_id = loop {
            if let DriveEvent::UploadProgress { upload_id, .. } = rx.recv().await.unwrap() {
                break upload_id;
            }
        };

        let pending = FileUniqueId::pending(&upload_id);
        assert!(drive.delete(&pending).await.unwrap());
        assert!(matches!(task.await.unwrap(), Err(DriveError::Cancelled)));
        assert_eq!(api.calls().delete, 0);
        assert_eq!(api.message_count(api.me().peer), 0);
    }

    #[tokio::test]
    async fn test_batch_upload_isolates_failures() {
        let config = DriveConfig {
            max_upload_size: 32,
            upload_concurrency: 2,
            ..Default::default()
        };
        let (api, drive, _dir) = setup_with(config).await;

        let results = drive
            .upload_batch(vec![
                text("one.txt", "1"),
                FilePayload::new("huge.bin", vec![0u8; 33]),
                text("two.txt", "2"),
            ])
            .await;
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(DriveError::Validation(_))));
        assert!(results[2].is_ok());
        assert_eq!(api.calls().send, 2);

        drive.set_sort(SortKey::Name, SortDirection::Ascending);
        let names: Vec<String> = drive.visible_files().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["one.txt", "two.txt"]);
    }

    #[tokio::test]
    async fn test_auth_expiry_signs_out() {
        let (api, drive, _dir) = setup().await;
        let mut rx = drive.subscribe();
        api.revoke_credential();

        assert!(matches!(drive.refresh().await, Err(DriveError::AuthExpired)));
        assert!(drive.is_signed_out());
        assert!(drain(&mut rx).contains(&DriveEvent::SignedOut));

        let sends = api.calls().send;
        assert!(matches!(
            drive.upload(text("late.txt", "x")).await,
            Err(DriveError::AuthExpired)
        ));
        assert_eq!(api.calls().send, sends);
    }

    #[tokio::test]
    async fn test_rename_and_delete_folder() {
        let (_api, drive, _dir) = setup().await;
        drive.create_folder("Photos", None).unwrap();
        drive.create_folder("2024", Some("/Photos")).unwrap();
        drive.open_folder(Some("/Photos/2024")).unwrap();
        let file = drive
            .upload(FilePayload::new("sunset.png", vec![2u8; 12]))
            .await
            .unwrap();

        drive.rename_folder("/Photos", "Pictures").unwrap();
        assert_eq!(
            drive.view_options().scope,
            ViewScope::Folder(Some("/Pictures/2024".into()))
        );
        assert_eq!(
            drive.visible_files()[0].folder_path.as_deref(),
            Some("/Pictures/2024")
        );

        assert_eq!(drive.delete_folder("/Pictures").unwrap(), 1);
        assert_eq!(drive.view_options().scope, ViewScope::Folder(None));
        let files = drive.visible_files();
        assert_eq!(files[0].file_unique_id, file.file_unique_id);
        assert_eq!(files[0].folder_path, None);
        assert!(drive.folders().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_selected() {
        let (api, drive, _dir) = setup().await;
        let a = drive.upload(text("a.txt", "a")).await.unwrap();
        let b = drive.upload(text("b.txt", "b")).await.unwrap();
        let c = drive.upload(text("c.txt", "c")).await.unwrap();

        drive.select(a.file_unique_id.clone());
        assert!(drive.toggle_selection(b.file_unique_id.clone()));
        assert!(drive.toggle_selection(c.file_unique_id.clone()));
        assert!(!drive.toggle_selection(c.file_unique_id.clone()));
        assert_eq!(drive.selection().len(), 2);

        let report = drive.delete_selected().await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.purged.len(), 2);
        assert!(drive.selection().is_empty());
        assert_eq!(drive.visible_files(), vec![c]);
        assert_eq!(api.message_count(api.me().peer), 1);
    }

    #[tokio::test]
    async fn test_restore_without_locator_is_rejected() {
        let (_api, drive, _dir) = setup().await;
        let upload_id = UploadId::new();
        let mut pending = StoredFile::pending(upload_id, &text("p.txt", "p"), None);
        pending.is_deleted = true;
        pending.deleted_at = Some(chrono::Utc::now());
        drive.db(|db| db.upsert(&pending)).unwrap();

        let err = drive.restore(&pending.file_unique_id).unwrap_err();
        assert!(matches!(err, DriveError::Validation(_)));

        let mut live = pending.clone();
        live.is_deleted = false;
        live.deleted_at = None;
        assert!(drive.db(|db| db.upsert(&live)).is_err());
    }

    #[tokio::test]
    async fn test_search_and_type_filter() {
        let (_api, drive, _dir) = setup().await;
        drive.upload(FilePayload::new("Report Q1.pdf", vec![1u8; 4])).await.unwrap();
        drive.upload(FilePayload::new("song.mp3", vec![1u8; 4])).await.unwrap();

        drive.set_filter(TypeFilter::Audio);
        assert_eq!(drive.visible_files().len(), 1);
        drive.set_filter(TypeFilter::All);
        drive.set_search("report");
        assert_eq!(drive.visible_files()[0].name, "Report Q1.pdf");
    }

    /// Takes its listing snapshot, then parks until released.
    struct ParkedListing {
        inner: TransportClient,
        listed: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl BlobTransport for ParkedListing {
        fn max_upload_size(&self) -> u64 {
            self.inner.max_upload_size()
        }

        async fn send(
            &self,
            payload: &FilePayload,
            on_progress: &(dyn Fn(u8) + Send + Sync),
            cancel: &CancellationToken,
        ) -> parcel_net::Result<RemoteRecord> {
            self.inner.send(payload, on_progress, cancel).await
        }

        async fn fetch(&self, locator: parcel_shared::RemoteLocator) -> parcel_net::Result<Bytes> {
            self.inner.fetch(locator).await
        }

        async fn fetch_thumbnail(&self, locator: parcel_shared::RemoteLocator) -> Option<Bytes> {
            self.inner.fetch_thumbnail(locator).await
        }

        async fn remove(&self, locator: parcel_shared::RemoteLocator) -> parcel_net::Result<bool> {
            self.inner.remove(locator).await
        }

        async fn list_existing(&self, limit: usize) -> parcel_net::Result<Vec<StoredFile>> {
            let snapshot = self.inner.list_existing(limit).await;
            self.listed.notify_one();
            self.release.notified().await;
            snapshot
        }
    }

    #[tokio::test]
    async fn test_refresh_does_not_undo_concurrent_changes() {
        let api = Arc::new(MemoryMessenger::new(b"cred".to_vec(), 7));
        let session =
            Session::new(b"cred".to_vec()).with_destination(StorageDestination::self_notes());
        let inner = TransportClient::connect(api.clone(), session).await.unwrap();
        let listed = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let transport = ParkedListing {
            inner,
            listed: listed.clone(),
            release: release.clone(),
        };
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(dir.path()).unwrap();
        let drive = Drive::open(Arc::new(transport), db, DriveConfig::default()).unwrap();

        let a = drive.upload(text("a.txt", "a")).await.unwrap();
        let b = drive.upload(text("b.txt", "b")).await.unwrap();
        drive.trash(&b.file_unique_id).unwrap();

        let meanwhile = async {
            listed.notified().await;
            assert!(drive.delete(&a.file_unique_id).await.unwrap());
            drive.empty_trash().await.unwrap();
            let c = drive.upload(text("c.txt", "c")).await.unwrap();
            release.notify_one();
            c
        };
        let (refreshed, c) = tokio::join!(drive.refresh(), meanwhile);
        refreshed.unwrap();

        let indexed: Vec<FileUniqueId> = drive
            .db(|db| db.get_all(&FileFilter::all()))
            .unwrap()
            .into_iter()
            .map(|f| f.file_unique_id)
            .collect();
        assert_eq!(indexed, vec![c.file_unique_id.clone()]);

        drive.set_scope(ViewScope::All);
        assert_eq!(drive.visible_files(), vec![c]);
        drive.set_scope(ViewScope::Trash);
        assert!(drive.visible_files().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_at_list_limit_keeps_older_records() {
        let (_api, drive, _dir) = setup_with(DriveConfig {
            list_limit: 2,
            ..DriveConfig::default()
        })
        .await;
        let first = drive.upload(text("1.txt", "one")).await.unwrap();
        drive.upload(text("2.txt", "two")).await.unwrap();
        drive.upload(text("3.txt", "three")).await.unwrap();
        assert_eq!(drive.visible_files().len(), 3);

        drive.refresh().await.unwrap();
        let visible = drive.visible_files();
        assert_eq!(visible.len(), 3);
        assert!(visible.iter().any(|f| f.file_unique_id == first.file_unique_id));
        drive.trash(&first.file_unique_id).unwrap();
    }

    #[tokio::test]
    async fn test_index_failure_after_send_reports_upload_failed() {
        let (api, drive, _dir) = setup().await;
        drive.create_folder("Docs", None).unwrap();
        drive.open_folder(Some("/Docs")).unwrap();
        drive
            .db(|db| {
                db.conn().execute_batch("DROP TABLE folders")?;
                Ok(())
            })
            .unwrap();
        let mut rx = drive.subscribe();

        let err = drive.upload(text("late.txt", "late")).await.unwrap_err();
        assert!(matches!(err, DriveError::Index(_)));
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, DriveEvent::UploadFailed { .. })));
        assert!(drive.uploads().is_empty());
        assert_eq!(api.message_count(api.me().peer), 1);
    }
}
