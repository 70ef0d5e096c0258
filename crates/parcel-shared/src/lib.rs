//! Types shared by every Parcel crate: the file model, destination
//! addressing, the caption convention and the session value.

pub mod caption;
pub mod constants;
pub mod error;
pub mod file;
pub mod mime;
pub mod session;
pub mod types;

pub use caption::Caption;
pub use error::{DestinationError, InvariantViolation};
pub use file::{FilePayload, StoredFile};
pub use mime::FileCategory;
pub use session::Session;
pub use types::{
    DestinationId, DestinationKind, FileUniqueId, NumericPeer, RemoteLocator, StorageDestination,
    UploadId,
};
