use serde::Serialize;
use tokio::sync::broadcast;

use parcel_shared::{FileUniqueId, UploadId};

pub const EVENT_UPLOAD_QUEUED: &str = "upload-queued";
pub const EVENT_UPLOAD_PROGRESS: &str = "upload-progress";
pub const EVENT_UPLOAD_FINISHED: &str = "upload-finished";
pub const EVENT_UPLOAD_FAILED: &str = "upload-failed";
pub const EVENT_FILES_CHANGED: &str = "files-changed";
pub const EVENT_SIGNED_OUT: &str = "signed-out";

/// Capacity of the drive's event channel. Slow subscribers lag and skip.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum DriveEvent {
    UploadQueued {
        upload_id: UploadId,
        name: String,
    },
    UploadProgress {
        upload_id: UploadId,
        percent: u8,
    },
    UploadFinished {
        upload_id: UploadId,
        file_unique_id: FileUniqueId,
    },
    UploadFailed {
        upload_id: UploadId,
        reason: String,
    },
    /// The visible listing must be re-read.
    FilesChanged,
    SignedOut,
}

impl DriveEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DriveEvent::UploadQueued { .. } => EVENT_UPLOAD_QUEUED,
            DriveEvent::UploadProgress { .. } => EVENT_UPLOAD_PROGRESS,
            DriveEvent::UploadFinished { .. } => EVENT_UPLOAD_FINISHED,
            DriveEvent::UploadFailed { .. } => EVENT_UPLOAD_FAILED,
            DriveEvent::FilesChanged => EVENT_FILES_CHANGED,
            DriveEvent::SignedOut => EVENT_SIGNED_OUT,
        }
    }
}

pub fn emit_event(tx: &broadcast::Sender<DriveEvent>, event: DriveEvent) {
    // no subscribers is not an error
    if tx.send(event).is_err() {
        tracing::trace!("drive event dropped, no subscribers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_match_serialized_tag() {
        let event = DriveEvent::UploadProgress {
            upload_id: UploadId::new(),
            percent: 40,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
        assert_eq!(json["payload"]["percent"], 40);

        let json = serde_json::to_value(DriveEvent::SignedOut).unwrap();
        assert_eq!(json["event"], EVENT_SIGNED_OUT);
    }
}
