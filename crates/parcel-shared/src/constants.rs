/// Reserved destination literal for the user's own notes chat
pub const SELF_DESTINATION: &str = "self";

/// Title shown for the self destination
pub const SELF_DESTINATION_TITLE: &str = "Saved Messages";

/// Prefix marking broadcast-channel class destinations (`-100<id>`)
pub const CHANNEL_ID_PREFIX: &str = "-100";

/// Prefix marking small-group destinations (`-<id>`)
pub const GROUP_ID_PREFIX: &str = "-";

/// Maximum upload size in bytes (2 GiB, transport-imposed)
pub const MAX_UPLOAD_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Default number of destinations fetched for the picker
pub const DEFAULT_DESTINATION_LIMIT: usize = 100;

/// Default number of remote records fetched during reconciliation
pub const DEFAULT_LIST_LIMIT: usize = 500;

/// Mime type used when neither caption nor transport knows better
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Key derivation context for unique ids derived from a remote locator
pub const KDF_CONTEXT_UNIQUE_ID: &str = "parcel-file-unique-id-v1";
