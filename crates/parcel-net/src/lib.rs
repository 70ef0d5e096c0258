// Transport layer: the seam to the external messaging client library, the
// destination address resolver and the blob-transport façade built on them.

pub mod api;
pub mod client;
pub mod error;
pub mod memory;
pub mod records;
pub mod resolver;
pub mod transport;

pub use api::{Dialog, DownloadSize, MessagingApi, OutgoingDocument, PeerAddress, RemoteDocument, RemoteMessage};
pub use client::TransportClient;
pub use error::{Result, TransportError};
pub use memory::MemoryMessenger;
pub use resolver::AddressResolver;
pub use transport::{BlobTransport, RemoteRecord};
